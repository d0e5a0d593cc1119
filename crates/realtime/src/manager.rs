//! Reference-counted connection manager.
//!
//! Independent consumers call [`connect`](ConnectionManager::connect) and
//! [`disconnect`](ConnectionManager::disconnect) in pairs; the physical
//! channel stays up while at least one reference is held, reconnects with
//! exponential backoff after abnormal closures, and is torn down when the
//! last reference goes away.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use geoqueue_protocol::{Frame, ModuleName};

use crate::error::RealtimeError;
use crate::reconnection::{ConnContext, begin_open, schedule_reconnect, teardown};
use crate::router::EventRouter;
use crate::sender::FrameSender;
use crate::types::{ConnectionEvent, ConnectionState, ConnectionStatus, ManagerConfig};
use crate::ws_client::{Connector, TungsteniteConnector};

/// Handle to one endpoint's channel. Cheap to clone; clones share state.
///
/// `connect`, `disconnect` and `force_disconnect` spawn tasks and must be
/// called from within a Tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    ctx: Arc<ConnContext>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.ctx.lock();
        f.debug_struct("ConnectionManager")
            .field("url", &self.ctx.config.url)
            .field("state", &core.state)
            .field("ref_count", &core.ref_count)
            .field("attempts", &core.attempts)
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
        router: Arc<EventRouter>,
    ) -> Self {
        Self {
            ctx: Arc::new(ConnContext::new(config, connector, router)),
        }
    }

    /// Manager over real WebSockets.
    pub fn with_tungstenite(config: ManagerConfig, router: Arc<EventRouter>) -> Self {
        let connector = Arc::new(TungsteniteConnector {
            max_message_size: config.max_message_size,
        });
        Self::new(config, connector, router)
    }

    /// Takes a reference on the channel, opening it if needed.
    ///
    /// A handshake already in flight is reused. A pending backoff is
    /// skipped and the channel is opened right away. After the attempts
    /// were exhausted, the counter starts over.
    ///
    /// A malformed endpoint is returned as an error; the reference is kept
    /// and a retry is scheduled, so the call must still be balanced by
    /// `disconnect()`.
    pub fn connect(&self) -> Result<(), RealtimeError> {
        let ctx = &self.ctx;
        let mut core = ctx.lock();
        core.ref_count += 1;
        debug!(ref_count = core.ref_count, "connect");

        match core.state {
            ConnectionState::Connecting | ConnectionState::Open => return Ok(()),
            ConnectionState::Disconnected | ConnectionState::Closing => {}
        }

        if core.halted {
            info!("resuming after max reconnect attempts");
            core.halted = false;
            core.attempts = 0;
        }
        if core.cancel_reconnect() {
            debug!("pending reconnect replaced by immediate open");
        }

        match begin_open(ctx, &mut core) {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(url = %ctx.config.url, error = %e, "cannot open channel");
                let mut events = vec![ConnectionEvent::Error {
                    message: e.to_string(),
                }];
                events.extend(schedule_reconnect(ctx, &mut core));
                drop(core);
                ctx.emit(events);
                Err(e.into())
            }
        }
    }

    /// Releases one reference. The last release closes the channel with a
    /// normal close and cancels any pending reconnect.
    pub fn disconnect(&self) {
        let ctx = &self.ctx;
        let mut core = ctx.lock();
        if core.ref_count == 0 {
            debug!("disconnect without matching connect, ignoring");
            return;
        }
        core.ref_count -= 1;
        debug!(ref_count = core.ref_count, "disconnect");
        if core.ref_count > 0 {
            return;
        }

        let event = teardown(ctx, &mut core, "client disconnect");
        core.attempts = 0;
        core.halted = false;
        drop(core);
        ctx.emit(event.into_iter().collect());
    }

    /// Drops every reference and closes immediately. Meant for logout.
    pub fn force_disconnect(&self) {
        let ctx = &self.ctx;
        let mut core = ctx.lock();
        info!(ref_count = core.ref_count, "force disconnect");
        core.ref_count = 0;
        let event = teardown(ctx, &mut core, "logout");
        core.attempts = 0;
        core.halted = false;
        drop(core);
        ctx.emit(event.into_iter().collect());
    }

    /// Sends a frame on the open channel.
    pub fn send(&self, frame: &Frame) -> Result<(), RealtimeError> {
        self.ctx.sender.send(frame)
    }

    /// Asks the server to resend a module's full state.
    pub fn request_refresh(&self, module: ModuleName) -> Result<(), RealtimeError> {
        self.ctx.sender.request_refresh(module)
    }

    pub fn state(&self) -> ConnectionState {
        self.ctx.lock().state
    }

    pub fn ref_count(&self) -> usize {
        self.ctx.lock().ref_count
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.ctx.lock().attempts
    }

    /// `true` after reconnect attempts ran out, until the next `connect()`.
    pub fn is_halted(&self) -> bool {
        self.ctx.lock().halted
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Observes the coarse status shown to users.
    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.ctx.status.subscribe()
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.ctx.router
    }

    /// Handle for sending on whatever channel is currently open.
    pub fn sender(&self) -> FrameSender {
        self.ctx.sender.clone()
    }

    pub fn endpoint(&self) -> &str {
        &self.ctx.config.url
    }
}
