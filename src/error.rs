// Typed errors with thiserror. Surface meaningful messages to JS.
// See DESIGN.md: Error handling

use thiserror::Error;
use wasm_bindgen::JsValue;

/// Sync engine error types.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed subtitle block {block}: {message}")]
    Parse { block: usize, message: String },

    #[error("No element found for cue {0}")]
    ResolutionMiss(String),

    #[error("Unknown cue id: {0}")]
    UnknownCue(String),

    #[error("Highlight render error for cue {cue_id}: {message}")]
    Render { cue_id: String, message: String },

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Background parse failed: {0}")]
    WorkerFailure(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl SyncError {
    /// Short machine-readable kind, used in error event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::InvalidConfig(_) => "invalid_config",
            SyncError::Parse { .. } => "parse",
            SyncError::ResolutionMiss(_) => "resolution_miss",
            SyncError::UnknownCue(_) => "unknown_cue",
            SyncError::Render { .. } => "render",
            SyncError::Playback(_) => "playback",
            SyncError::WorkerFailure(_) => "worker_failure",
            SyncError::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<SyncError> for JsValue {
    fn from(err: SyncError) -> Self {
        JsValue::from_str(&err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = SyncError::InvalidConfig("missing field".to_string());
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn parse_error_names_block() {
        let err = SyncError::Parse {
            block: 3,
            message: "missing -->".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed subtitle block 3: missing -->");
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn json_errors_convert() {
        let err: SyncError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, SyncError::Serialization(_)));
    }
}
