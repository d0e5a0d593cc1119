//! Persistence and import pipeline collaborator.
//!
//! The app implements [`JobBackend`] over HTTP; tests hand in fakes.

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

use geoqueue_protocol::{ItemId, ItemRecord, JobKind};

use crate::error::JobError;

/// A single-item job the backend should enqueue.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum JobRequest {
    Import {
        item_id: ItemId,
        request_id: String,
        options: serde_json::Value,
    },
    Delete {
        item_id: ItemId,
        request_id: String,
    },
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Import { .. } => JobKind::Upload,
            JobRequest::Delete { .. } => JobKind::Delete,
        }
    }

    pub fn item_id(&self) -> ItemId {
        match self {
            JobRequest::Import { item_id, .. } | JobRequest::Delete { item_id, .. } => *item_id,
        }
    }

    pub fn request_id(&self) -> &str {
        match self {
            JobRequest::Import { request_id, .. } | JobRequest::Delete { request_id, .. } => {
                request_id
            }
        }
    }
}

/// Server acknowledgment of an enqueued job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobTicket {
    pub job_id: String,
}

/// Boxed future returned by [`JobBackend`] methods.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, JobError>> + Send + 'a>>;

/// Abstract access to the server's job queue and item collection.
pub trait JobBackend: Send + Sync {
    /// Enqueues a job and returns its server id.
    fn enqueue(&self, request: JobRequest) -> BackendFuture<'_, JobTicket>;

    /// Fetches the authoritative item collection.
    fn fetch_items(&self) -> BackendFuture<'_, Vec<ItemRecord>>;
}
