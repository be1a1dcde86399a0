//! Error types for engine operations.
//!
//! Per-frame failures (malformed detections, over-budget encodes) are
//! degraded and counted, never surfaced through this enum; these variants
//! cover the query/delete/config surface exposed to consumers.

use lookout_protocol::ErrorInfo;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Invalid detection input: {0}")]
    InvalidInput(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Cannot delete the active session: {0}")]
    ActiveSessionConflict(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("JSON error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl EngineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        EngineError::Io {
            context: context.into(),
            source,
        }
    }

    /// Stable wire code for the transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidInput(_) => "invalid_input",
            EngineError::SessionNotFound(_) | EngineError::ArtifactNotFound(_) => "not_found",
            EngineError::ActiveSessionConflict(_) => "conflict",
            EngineError::InvalidConfig(_) => "invalid_config",
            EngineError::Io { .. } => "io_error",
            EngineError::Database(_) => "database_error",
            EngineError::Json { .. } => "serialization_error",
        }
    }
}

impl From<EngineError> for ErrorInfo {
    fn from(err: EngineError) -> Self {
        ErrorInfo::new(err.code(), err.to_string())
    }
}

/// Convenience alias for Results using EngineError.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_to_wire_codes() {
        assert_eq!(
            EngineError::SessionNotFound("20260101_000000".into()).code(),
            "not_found"
        );
        assert_eq!(
            EngineError::ActiveSessionConflict("20260101_000000".into()).code(),
            "conflict"
        );
        assert_eq!(EngineError::InvalidConfig("bad".into()).code(), "invalid_config");
    }
}
