//! Protocol decoding errors.

/// Errors produced while decoding frames into typed events.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event type `{event_type}` for module `{module}`")]
    UnknownEvent {
        module: &'static str,
        event_type: String,
    },

    #[error("frame `{0}` is missing its data payload")]
    MissingData(String),
}
