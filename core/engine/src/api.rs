//! Request dispatch for transport clients.
//!
//! The transport collaborator owns framing and routing (HTTP, WebSocket);
//! this maps one parsed request onto the engine surface and shapes the
//! response. Kept transport-agnostic so every client goes through the same
//! validation.

use serde_json::Value;

use crate::pipeline::EngineHandle;
use lookout_protocol::{
    parse_config_patch, ErrorInfo, Method, Request, Response, PROTOCOL_VERSION,
};

pub fn handle_request(request: Request, handle: &EngineHandle) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    tracing::debug!(method = ?request.method, id = ?request.id, "Engine request received");

    match request.method {
        Method::GetTracks => {
            let tracks = handle
                .broadcaster
                .current()
                .map(|snapshot| snapshot.tracks.clone())
                .unwrap_or_default();
            serialize_ok(request.id, &serde_json::json!({ "tracks": tracks }))
        }
        Method::GetMetrics => match handle.broadcaster.current() {
            Some(snapshot) => serialize_ok(request.id, &snapshot.metrics),
            None => Response::ok(request.id, serde_json::json!({ "status": "no_data" })),
        },
        Method::GetDetections => {
            let (session_id, limit) = match parse_detection_params(request.params) {
                Ok(values) => values,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match handle.ledger.detections(session_id.as_deref(), limit) {
                Ok(records) => serialize_ok(
                    request.id,
                    &serde_json::json!({
                        "total": records.len(),
                        "detections": records,
                    }),
                ),
                Err(err) => Response::error_with_info(request.id, err.into()),
            }
        }
        Method::GetSessions => match handle.ledger.list_sessions() {
            Ok(sessions) => serialize_ok(request.id, &serde_json::json!({ "sessions": sessions })),
            Err(err) => Response::error_with_info(request.id, err.into()),
        },
        Method::GetSession => {
            let session_id = match required_string(request.params.as_ref(), "session_id") {
                Ok(value) => value,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match handle.ledger.get_session(&session_id) {
                Ok(session) => serialize_ok(request.id, &session),
                Err(err) => Response::error_with_info(request.id, err.into()),
            }
        }
        Method::DeleteSession => {
            let session_id = match required_string(request.params.as_ref(), "session_id") {
                Ok(value) => value,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match handle.ledger.delete_session(&session_id) {
                Ok(()) => Response::ok(
                    request.id,
                    serde_json::json!({ "status": "deleted", "session_id": session_id }),
                ),
                Err(err) => Response::error_with_info(request.id, err.into()),
            }
        }
        Method::NewSession => match handle.ledger.close_active() {
            Ok(session_id) => Response::ok(
                request.id,
                serde_json::json!({ "status": "started", "session_id": session_id }),
            ),
            Err(err) => Response::error_with_info(request.id, err.into()),
        },
        Method::GetConfig => serialize_ok(request.id, &handle.settings.current().snapshot()),
        Method::SetConfig => {
            let params = match request.params {
                Some(params) => params,
                None => {
                    return Response::error(request.id, "invalid_params", "config payload is required")
                }
            };
            let patch = match parse_config_patch(params) {
                Ok(patch) => patch,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match handle.settings.apply(&patch) {
                Ok(snapshot) => {
                    tracing::info!(
                        confidence = snapshot.confidence,
                        save_confidence = snapshot.save_confidence,
                        image_size = snapshot.image_size,
                        skip_frames = snapshot.skip_frames,
                        "Config updated"
                    );
                    serialize_ok(request.id, &snapshot)
                }
                Err(err) => Response::error_with_info(request.id, err.into()),
            }
        }
        Method::GetMedia => {
            let reference = match required_string(request.params.as_ref(), "ref") {
                Ok(value) => value,
                Err(err) => return Response::error_with_info(request.id, err),
            };
            match handle.ledger.media().resolve(&reference) {
                Ok(path) => Response::ok(
                    request.id,
                    serde_json::json!({ "path": path.to_string_lossy() }),
                ),
                Err(err) => Response::error_with_info(request.id, err.into()),
            }
        }
    }
}

fn serialize_ok<T: serde::Serialize>(id: Option<String>, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::ok(id, value),
        Err(err) => Response::error(
            id,
            "serialization_error",
            format!("Failed to serialize response: {}", err),
        ),
    }
}

fn parse_detection_params(params: Option<Value>) -> Result<(Option<String>, Option<usize>), ErrorInfo> {
    let mut session_id = None;
    let mut limit = None;

    if let Some(params) = params {
        if !params.is_object() {
            return Err(ErrorInfo::new("invalid_params", "params must be an object"));
        }
        if let Some(value) = params.get("session_id").and_then(|v| v.as_str()) {
            if !value.trim().is_empty() {
                session_id = Some(value.to_string());
            }
        }
        if let Some(value) = params.get("limit").and_then(|v| v.as_u64()) {
            limit = Some(value as usize);
        }
    }

    Ok((session_id, limit))
}

fn required_string(params: Option<&Value>, field: &str) -> Result<String, ErrorInfo> {
    params
        .and_then(|params| params.get(field))
        .and_then(|value| value.as_str())
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
        .ok_or_else(|| ErrorInfo::new("invalid_params", format!("{} is required", field)))
}
