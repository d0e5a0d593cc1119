use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often the client sends a keepalive `ping` frame on an open channel.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// How long the client waits for the matching `pong` before declaring the
/// channel dead.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay before the first reconnection attempt.
pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound for the exponential reconnection backoff.
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Automatic reconnection stops after this many consecutive failed attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Maximum accepted text frame size in bytes (4 MB).
pub const WS_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Close code for a client-initiated, graceful shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Application close code used when the heartbeat times out. Any close with
/// a code other than [`CLOSE_NORMAL`] counts as abnormal and is retried.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;

/// Reserved keepalive request type.
pub const FRAME_PING: &str = "ping";

/// Reserved keepalive acknowledgment type.
pub const FRAME_PONG: &str = "pong";

/// Outbound resync request, answered with `initial_state`.
pub const FRAME_REFRESH: &str = "refresh";

// Per-module event types.
pub const EVENT_INITIAL_STATE: &str = "initial_state";
pub const EVENT_STARTED: &str = "started";
pub const EVENT_STATUS_UPDATED: &str = "status_updated";
pub const EVENT_COMPLETED: &str = "completed";
pub const EVENT_FAILED: &str = "failed";
pub const EVENT_ITEM_ADDED: &str = "item_added";
pub const EVENT_ITEM_DELETED: &str = "item_deleted";
pub const EVENT_ITEMS_DELETED: &str = "items_deleted";
pub const EVENT_ITEM_IMPORTED: &str = "item_imported";

// Outbound bulk triggers.
pub const TRIGGER_START_BULK_IMPORT: &str = "start_bulk_import";
pub const TRIGGER_START_BULK_DELETE: &str = "start_bulk_delete";

/// Returns `true` for the reserved keepalive frame types.
pub fn is_keepalive(frame_type: &str) -> bool {
    frame_type == FRAME_PING || frame_type == FRAME_PONG
}

/// Server-side module identifiers.
///
/// Frames carry the module as a plain string so that an older client can
/// still parse frames addressed to modules it does not know about;
/// [`ModuleName::parse`] returns `None` for those.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleName {
    /// The uploaded-file queue itself (snapshots, additions, removals).
    #[serde(rename = "queue")]
    Queue,
    /// Single file import jobs.
    #[serde(rename = "upload")]
    Upload,
    /// Single item deletion jobs.
    #[serde(rename = "delete")]
    Delete,
    #[serde(rename = "bulk_import")]
    BulkImport,
    #[serde(rename = "bulk_delete")]
    BulkDelete,
}

impl ModuleName {
    pub const ALL: [ModuleName; 5] = [
        ModuleName::Queue,
        ModuleName::Upload,
        ModuleName::Delete,
        ModuleName::BulkImport,
        ModuleName::BulkDelete,
    ];

    /// Wire identifier of the module.
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleName::Queue => "queue",
            ModuleName::Upload => "upload",
            ModuleName::Delete => "delete",
            ModuleName::BulkImport => "bulk_import",
            ModuleName::BulkDelete => "bulk_delete",
        }
    }

    /// Parses a wire identifier. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
