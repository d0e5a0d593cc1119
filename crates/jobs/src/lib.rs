//! Job lifecycle tracking and queue reconciliation for geoqueue clients.
//!
//! [`SyncState`] holds the item collection, the active jobs and the pending
//! deletes. Realtime [`modules`] feed server pushes into it,
//! [`QueueActions`] feeds user actions, and the reconciler settles the
//! difference on every authoritative snapshot.

pub mod actions;
pub mod backend;
pub mod error;
pub mod job;
pub mod modules;
pub mod queue;
pub mod reconciler;
pub mod refresh;
pub mod state;
pub mod tracker;

pub use actions::QueueActions;
pub use backend::{BackendFuture, JobBackend, JobRequest, JobTicket};
pub use error::JobError;
pub use job::{Job, Progress};
pub use modules::{JobModule, QueueModule, default_registry};
pub use queue::{ItemFlags, Queue, QueueItem, QueueStore};
pub use reconciler::{DEFAULT_GRACE_CYCLES, ReconcileConfig, ReconcileOutcome, Reconciler};
pub use refresh::{run_periodic_refresh, spawn_periodic_refresh};
pub use state::{QueueOutcome, SharedState, SyncState};
pub use tracker::{Applied, FINISHED_MEMORY, JobTracker, TrackerEffect};
