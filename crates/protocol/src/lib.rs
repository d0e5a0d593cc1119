//! Wire protocol for the geoqueue realtime channel.
//!
//! Every frame on the channel is a JSON object `{ module?, type, data? }`.
//! This crate owns the frame envelope, the reserved constants (keepalive,
//! close codes, module names) and the closed per-module event vocabularies
//! that handlers decode frames into.

pub mod constants;
pub mod error;
pub mod events;
pub mod frame;
pub mod types;

pub use constants::ModuleName;
pub use error::ProtocolError;
pub use events::{
    BulkDeleteTrigger, BulkImportTrigger, JobCompleted, JobEvent, JobFailed, JobProgress,
    JobStarted, QueueEvent,
};
pub use frame::Frame;
pub use types::{ItemId, ItemRecord, JobKind, JobStatus};
