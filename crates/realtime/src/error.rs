//! Error types for the realtime layer.

use geoqueue_protocol::ProtocolError;

use crate::ws_client::WsError;

/// Errors returned by the public [`ConnectionManager`](crate::ConnectionManager)
/// and [`FrameSender`](crate::FrameSender) API.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error(transparent)]
    Ws(#[from] WsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not connected")]
    NotConnected,

    #[error("outbound queue full")]
    QueueFull,
}

/// Error returned by a module event handler. Logged by the router, never
/// propagated to other handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Failed(String),
}

/// Error returned by a module factory.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("module `{module}` failed to load: {reason}")]
    Load {
        module: &'static str,
        reason: String,
    },
}
