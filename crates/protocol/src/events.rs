//! Closed event vocabularies per module.
//!
//! Routing works on raw `(module, type)` strings; handlers then decode the
//! frame into one of these enums and match on it exhaustively, so a new
//! server event type shows up as a decode error instead of silent drift.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{
    EVENT_COMPLETED, EVENT_FAILED, EVENT_INITIAL_STATE, EVENT_ITEM_ADDED, EVENT_ITEM_DELETED,
    EVENT_ITEM_IMPORTED, EVENT_ITEMS_DELETED, EVENT_STARTED, EVENT_STATUS_UPDATED, ModuleName,
};
use crate::error::ProtocolError;
use crate::frame::Frame;
use crate::types::{ItemId, ItemRecord};

// ---------------------------------------------------------------------------
// Job events (upload, delete, bulk_import, bulk_delete)
// ---------------------------------------------------------------------------

/// A job was accepted by the server and is now running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStarted {
    #[serde(deserialize_with = "string_or_number")]
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_ids: Vec<ItemId>,
    /// Echo of the client-issued request id for jobs triggered over the
    /// channel. Confirms the provisional job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Progress report for a running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    #[serde(deserialize_with = "string_or_number")]
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_ids: Vec<ItemId>,
    /// Batch member currently being processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_item_id: Option<ItemId>,
    /// Batch members already finished, in any order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub completed_item_ids: Vec<ItemId>,
    /// Percentage in `0..=100` for single-item jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A job finished successfully.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCompleted {
    #[serde(deserialize_with = "string_or_number")]
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_ids: Vec<ItemId>,
}

/// A job failed on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFailed {
    #[serde(deserialize_with = "string_or_number")]
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_ids: Vec<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobFailed {
    /// Error text for display; the server does not always send one.
    pub fn message(&self) -> &str {
        self.error.as_deref().unwrap_or("job failed")
    }
}

/// Event vocabulary shared by every job-carrying module.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Started(JobStarted),
    StatusUpdated(JobProgress),
    Completed(JobCompleted),
    Failed(JobFailed),
}

impl JobEvent {
    /// Event types a job module subscribes to.
    pub const TYPES: [&'static str; 4] = [
        EVENT_STARTED,
        EVENT_STATUS_UPDATED,
        EVENT_COMPLETED,
        EVENT_FAILED,
    ];

    /// Decodes a frame addressed to `module`.
    pub fn decode(module: ModuleName, frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.frame_type.as_str() {
            EVENT_STARTED => Ok(JobEvent::Started(frame.require_data()?)),
            EVENT_STATUS_UPDATED => Ok(JobEvent::StatusUpdated(frame.require_data()?)),
            EVENT_COMPLETED => Ok(JobEvent::Completed(frame.require_data()?)),
            EVENT_FAILED => Ok(JobEvent::Failed(frame.require_data()?)),
            other => Err(ProtocolError::UnknownEvent {
                module: module.as_str(),
                event_type: other.to_owned(),
            }),
        }
    }

    pub fn job_id(&self) -> &str {
        match self {
            JobEvent::Started(e) => &e.job_id,
            JobEvent::StatusUpdated(e) => &e.job_id,
            JobEvent::Completed(e) => &e.job_id,
            JobEvent::Failed(e) => &e.job_id,
        }
    }

    /// All item ids referenced by the event (`item_id` merged with
    /// `item_ids`, deduplicated).
    pub fn targets(&self) -> BTreeSet<ItemId> {
        let (one, many) = match self {
            JobEvent::Started(e) => (e.item_id, &e.item_ids),
            JobEvent::StatusUpdated(e) => (e.item_id, &e.item_ids),
            JobEvent::Completed(e) => (e.item_id, &e.item_ids),
            JobEvent::Failed(e) => (e.item_id, &e.item_ids),
        };
        one.into_iter().chain(many.iter().copied()).collect()
    }
}

// ---------------------------------------------------------------------------
// Queue events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialState {
    #[serde(default)]
    pub items: Vec<ItemRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub item: ItemRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDeleted {
    pub item_id: ItemId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemsDeleted {
    #[serde(default)]
    pub item_ids: Vec<ItemId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemImported {
    pub item_id: ItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
    /// Full updated record, when the server includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<ItemRecord>,
}

/// Event vocabulary of the `queue` module.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueEvent {
    InitialState(InitialState),
    ItemAdded(ItemAdded),
    ItemDeleted(ItemDeleted),
    ItemsDeleted(ItemsDeleted),
    ItemImported(ItemImported),
}

impl QueueEvent {
    pub const TYPES: [&'static str; 5] = [
        EVENT_INITIAL_STATE,
        EVENT_ITEM_ADDED,
        EVENT_ITEM_DELETED,
        EVENT_ITEMS_DELETED,
        EVENT_ITEM_IMPORTED,
    ];

    pub fn decode(frame: &Frame) -> Result<Self, ProtocolError> {
        match frame.frame_type.as_str() {
            // An empty snapshot may arrive without a payload.
            EVENT_INITIAL_STATE => Ok(QueueEvent::InitialState(
                frame
                    .parse_data()?
                    .unwrap_or(InitialState { items: Vec::new() }),
            )),
            EVENT_ITEM_ADDED => Ok(QueueEvent::ItemAdded(frame.require_data()?)),
            EVENT_ITEM_DELETED => Ok(QueueEvent::ItemDeleted(frame.require_data()?)),
            EVENT_ITEMS_DELETED => Ok(QueueEvent::ItemsDeleted(frame.require_data()?)),
            EVENT_ITEM_IMPORTED => Ok(QueueEvent::ItemImported(frame.require_data()?)),
            other => Err(ProtocolError::UnknownEvent {
                module: ModuleName::Queue.as_str(),
                event_type: other.to_owned(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound triggers
// ---------------------------------------------------------------------------

/// Payload of `start_bulk_import`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkImportTrigger {
    pub request_id: String,
    pub item_ids: Vec<ItemId>,
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Payload of `start_bulk_delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkDeleteTrigger {
    pub request_id: String,
    pub item_ids: Vec<ItemId>,
}

/// Job ids are opaque; some server endpoints emit them as numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number job id, got {other}"
        ))),
    }
}
