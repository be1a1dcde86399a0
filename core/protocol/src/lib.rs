//! Query/config protocol types for the Lookout tracking engine.
//!
//! This crate is shared by the engine and its transport clients (HTTP,
//! WebSocket, recording) to prevent schema drift. The engine remains the
//! authority on validation, but clients can reuse the same types to
//! construct valid requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_REQUEST_BYTES: usize = 1024 * 1024; // 1MB

/// Model input sizes the detector collaborator accepts.
pub const SUPPORTED_IMAGE_SIZES: [u32; 6] = [160, 320, 480, 640, 960, 1280];

/// Upper bound on a single detection-log query.
pub const MAX_DETECTION_QUERY_LIMIT: usize = 1000;
pub const DEFAULT_DETECTION_QUERY_LIMIT: usize = 200;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetTracks,
    GetDetections,
    GetMetrics,
    GetConfig,
    SetConfig,
    GetSessions,
    GetSession,
    DeleteSession,
    NewSession,
    GetMedia,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }

    pub fn error_with_info(id: Option<String>, error: ErrorInfo) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(error),
        }
    }
}

/// Axis-aligned box in source-frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// A box is usable only with strictly positive extent and finite fields.
    pub fn is_valid(&self) -> bool {
        self.w > 0.0
            && self.h > 0.0
            && self.x.is_finite()
            && self.y.is_finite()
            && self.w.is_finite()
            && self.h.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackPhase {
    Active,
    Lost,
}

/// One active track as served to dashboards and pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackEntry {
    pub track_id: u64,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub frame_number: u64,
    pub timestamp: String,
    pub first_seen: String,
    pub phase: TrackPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jpeg_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gif_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub fps: f64,
    pub avg_frame_ms: f64,
    pub last_inference_ms: f64,
    pub frame_number: u64,
    pub active_tracks: usize,
    pub total_detections: u64,
    pub invalid_detections: u64,
    pub dropped_artifacts: u64,
    pub session_id: String,
}

/// Immutable published view of the pipeline: everything a consumer may read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracksSnapshot {
    pub frame_number: u64,
    pub tracks: Vec<TrackEntry>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionKind {
    Created,
    Updated,
}

/// One persisted detection-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub session_id: String,
    pub track_id: u64,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub frame_number: u64,
    pub recorded_at: String,
    pub kind: DetectionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
    pub active: bool,
    pub detections: u64,
    pub tracks: u64,
    pub gifs: u64,
    pub classes: Vec<String>,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub confidence: f32,
    pub save_confidence: f32,
    pub image_size: u32,
    pub skip_frames: u32,
}

/// Partial config update; absent fields keep their current value.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_frames: Option<u32>,
}

impl ConfigPatch {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if let Some(value) = self.confidence {
            require_confidence(value, "confidence")?;
        }
        if let Some(value) = self.save_confidence {
            require_confidence(value, "save_confidence")?;
        }
        if let Some(value) = self.image_size {
            if !SUPPORTED_IMAGE_SIZES.contains(&value) {
                return Err(ErrorInfo::new(
                    "invalid_config",
                    format!(
                        "image_size must be one of {:?}, got {}",
                        SUPPORTED_IMAGE_SIZES, value
                    ),
                ));
            }
        }
        // skip_frames is unsigned; any value is a valid skip count.
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.confidence.is_none()
            && self.save_confidence.is_none()
            && self.image_size.is_none()
            && self.skip_frames.is_none()
    }
}

pub fn parse_config_patch(params: Value) -> Result<ConfigPatch, ErrorInfo> {
    let patch: ConfigPatch = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("config payload is invalid JSON: {}", err),
        )
    })?;
    patch.validate()?;
    Ok(patch)
}

fn require_confidence(value: f32, field: &str) -> Result<(), ErrorInfo> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(ErrorInfo::new(
            "invalid_config",
            format!("{} must be within [0, 1], got {}", field, value),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_patch() {
        let patch = parse_config_patch(serde_json::json!({
            "confidence": 0.5,
            "save_confidence": 0.7,
            "image_size": 640,
            "skip_frames": 2,
        }))
        .expect("valid patch");
        assert_eq!(patch.confidence, Some(0.5));
        assert_eq!(patch.image_size, Some(640));
    }

    #[test]
    fn rejects_out_of_range_confidence() {
        let err = parse_config_patch(serde_json::json!({ "confidence": 1.5 }))
            .expect_err("confidence above 1");
        assert_eq!(err.code, "invalid_config");

        let err = parse_config_patch(serde_json::json!({ "save_confidence": -0.1 }))
            .expect_err("negative confidence");
        assert_eq!(err.code, "invalid_config");
    }

    #[test]
    fn rejects_unsupported_image_size() {
        let err =
            parse_config_patch(serde_json::json!({ "image_size": 500 })).expect_err("bad imgsz");
        assert_eq!(err.code, "invalid_config");
    }

    #[test]
    fn rejects_unknown_fields() {
        let err = parse_config_patch(serde_json::json!({ "model_path": "x.onnx" }))
            .expect_err("unknown field");
        assert_eq!(err.code, "invalid_params");
    }

    #[test]
    fn empty_patch_is_valid_and_empty() {
        let patch = parse_config_patch(serde_json::json!({})).expect("empty patch");
        assert!(patch.is_empty());
    }

    #[test]
    fn bounding_box_validity() {
        assert!(BoundingBox::new(0.0, 0.0, 10.0, 5.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, 0.0, 5.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, -3.0, 5.0).is_valid());
        assert!(!BoundingBox::new(f32::NAN, 0.0, 3.0, 5.0).is_valid());
    }

    #[test]
    fn response_round_trip() {
        let response = Response::error(Some("req-1".to_string()), "not_found", "no such session");
        let raw = serde_json::to_string(&response).expect("serialize");
        let parsed: Response = serde_json::from_str(&raw).expect("parse");
        assert!(!parsed.ok);
        assert_eq!(parsed.error.expect("error info").code, "not_found");
    }
}
