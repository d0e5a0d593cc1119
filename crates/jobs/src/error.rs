use geoqueue_protocol::{ItemId, JobKind};
use geoqueue_realtime::RealtimeError;

/// Errors from queue actions and job bookkeeping.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("item {item_id} already has a {kind} job in flight")]
    ItemBusy { item_id: ItemId, kind: JobKind },

    #[error("item {0} is not in the queue")]
    UnknownItem(ItemId),

    #[error("no items selected")]
    EmptySelection,

    #[error("backend error: {0}")]
    Backend(String),

    #[error(transparent)]
    Realtime(#[from] RealtimeError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sync state lock poisoned")]
    Poisoned,
}
