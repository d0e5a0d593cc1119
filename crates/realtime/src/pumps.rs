//! Per-channel tasks: read, write and keepalive.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;
