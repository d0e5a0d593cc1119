//! Outbound frame handle shared with modules.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite;
use tracing::trace;

use geoqueue_protocol::{Frame, ModuleName};

use crate::error::RealtimeError;

type Slot = Arc<Mutex<Option<(u64, mpsc::Sender<tungstenite::Message>)>>>;

/// Cloneable handle for sending frames on whatever channel is currently open.
///
/// Sends never wait: a full outbound queue is reported as
/// [`RealtimeError::QueueFull`] so handlers stay non-blocking.
#[derive(Clone, Default)]
pub struct FrameSender {
    slot: Slot,
}

impl std::fmt::Debug for FrameSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSender")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl FrameSender {
    /// A sender that is not attached to any channel yet.
    pub fn detached() -> Self {
        Self::default()
    }

    /// A sender permanently attached to `tx`. Lets alternative transports
    /// and tests observe outbound frames directly.
    pub fn attached(tx: mpsc::Sender<tungstenite::Message>) -> Self {
        let sender = Self::default();
        sender.attach(0, tx);
        sender
    }

    pub(crate) fn attach(&self, generation: u64, tx: mpsc::Sender<tungstenite::Message>) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some((generation, tx));
        }
    }

    /// Detaches only if the slot still belongs to `generation`.
    pub(crate) fn detach(&self, generation: u64) {
        if let Ok(mut slot) = self.slot.lock()
            && slot.as_ref().is_some_and(|(g, _)| *g == generation)
        {
            *slot = None;
        }
    }

    pub(crate) fn detach_all(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }

    /// Returns `true` while a channel is attached.
    pub fn is_connected(&self) -> bool {
        self.slot
            .lock()
            .map(|s| s.as_ref().is_some_and(|(_, tx)| !tx.is_closed()))
            .unwrap_or(false)
    }

    /// Queues a frame on the current channel.
    pub fn send(&self, frame: &Frame) -> Result<(), RealtimeError> {
        let json = frame.to_json()?;
        let tx = self
            .slot
            .lock()
            .ok()
            .and_then(|s| s.as_ref().map(|(_, tx)| tx.clone()))
            .ok_or(RealtimeError::NotConnected)?;

        trace!(module = ?frame.module, frame_type = %frame.frame_type, "queueing frame");
        match tx.try_send(tungstenite::Message::Text(json.into())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RealtimeError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(RealtimeError::NotConnected),
        }
    }

    /// Asks the server to resend a module's full state.
    pub fn request_refresh(&self, module: ModuleName) -> Result<(), RealtimeError> {
        self.send(&Frame::refresh(module))
    }
}
