use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::ModuleName;

/// Server-assigned identifier of a queue item (an uploaded file record).
pub type ItemId = i64;

/// Authoritative server record for one uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: ItemId,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Server-side status label (`pending`, `imported`, ...). Opaque here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Number of records produced by the import, computed server-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ItemRecord {
    /// Minimal record, mostly useful for tests and placeholders.
    pub fn new(id: ItemId, filename: impl Into<String>) -> Self {
        Self {
            id,
            filename: filename.into(),
            file_type: None,
            file_size: None,
            status: None,
            record_count: None,
            created_at: None,
        }
    }
}

/// Kind of asynchronous server-side job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Upload,
    Delete,
    BulkImport,
    BulkDelete,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        self.module().as_str()
    }

    /// Module whose frames announce this kind of job.
    pub fn module(self) -> ModuleName {
        match self {
            JobKind::Upload => ModuleName::Upload,
            JobKind::Delete => ModuleName::Delete,
            JobKind::BulkImport => ModuleName::BulkImport,
            JobKind::BulkDelete => ModuleName::BulkDelete,
        }
    }

    /// Job kind announced by a module, if the module carries jobs.
    pub fn for_module(module: ModuleName) -> Option<Self> {
        match module {
            ModuleName::Queue => None,
            ModuleName::Upload => Some(JobKind::Upload),
            ModuleName::Delete => Some(JobKind::Delete),
            ModuleName::BulkImport => Some(JobKind::BulkImport),
            ModuleName::BulkDelete => Some(JobKind::BulkDelete),
        }
    }

    pub fn is_delete(self) -> bool {
        matches!(self, JobKind::Delete | JobKind::BulkDelete)
    }

    pub fn is_import(self) -> bool {
        matches!(self, JobKind::Upload | JobKind::BulkImport)
    }

    pub fn is_bulk(self) -> bool {
        matches!(self, JobKind::BulkImport | JobKind::BulkDelete)
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Requested by this client, not yet acknowledged by the server.
    Queued,
    Started,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}
