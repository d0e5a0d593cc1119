//! Channel lifecycle core: opening, teardown and backoff reconnection.
//!
//! All mutation goes through [`ConnContext::core`], a short-lived std mutex
//! that is never held across an `.await`. Module hooks run under the lock
//! (they only get a [`FrameSender`]); lifecycle observers run after it is
//! released so they may call back into the manager.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use geoqueue_protocol::constants::CLOSE_NORMAL;

use crate::registry::ModuleContext;
use crate::router::EventRouter;
use crate::sender::FrameSender;
use crate::types::{CloseInfo, ConnectionEvent, ConnectionState, ConnectionStatus, ManagerConfig};
use crate::ws_client::{ClientHooks, Connector, WsClient, WsError, build_request};

/// Mutable connection bookkeeping.
pub(crate) struct Core {
    pub(crate) state: ConnectionState,
    pub(crate) ref_count: usize,
    /// Consecutive failed attempts since the last successful open.
    pub(crate) attempts: u32,
    /// Set once attempts are exhausted; cleared by the next `connect()`.
    pub(crate) halted: bool,
    pub(crate) reconnect: Option<CancellationToken>,
    pub(crate) client: Option<WsClient>,
    /// Generation of a locally closed channel that has not reported back.
    pub(crate) closing: Option<u64>,
}

impl Core {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            ref_count: 0,
            attempts: 0,
            halted: false,
            reconnect: None,
            client: None,
            closing: None,
        }
    }

    pub(crate) fn cancel_reconnect(&mut self) -> bool {
        match self.reconnect.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Shared state behind a [`ConnectionManager`](crate::ConnectionManager).
pub(crate) struct ConnContext {
    pub(crate) config: ManagerConfig,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) router: Arc<EventRouter>,
    pub(crate) sender: FrameSender,
    /// Bumped whenever a channel is opened or superseded.
    pub(crate) generation: Arc<AtomicU64>,
    pub(crate) core: Mutex<Core>,
    pub(crate) status: watch::Sender<ConnectionStatus>,
}

impl ConnContext {
    pub(crate) fn new(
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
        router: Arc<EventRouter>,
    ) -> Self {
        let (status, _rx) = watch::channel(ConnectionStatus::Offline);
        Self {
            config,
            connector,
            router,
            sender: FrameSender::detached(),
            generation: Arc::new(AtomicU64::new(0)),
            core: Mutex::new(Core::new()),
            status,
        }
    }

    /// Locks the core, recovering from a poisoned lock.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    pub(crate) fn emit(&self, events: Vec<ConnectionEvent>) {
        for event in &events {
            self.router.emit_lifecycle(event);
        }
    }
}

/// Starts a handshake for a new generation.
///
/// Endpoint validation happens here, synchronously; the network part runs
/// in a spawned task.
pub(crate) fn begin_open(ctx: &Arc<ConnContext>, core: &mut Core) -> Result<(), WsError> {
    let request = build_request(&ctx.config.url)?;
    let generation = ctx.generation.fetch_add(1, Ordering::AcqRel) + 1;

    core.closing = None;
    core.state = ConnectionState::Connecting;
    ctx.set_status(ConnectionStatus::Connecting);
    debug!(url = %ctx.config.url, generation, "opening channel");

    tokio::spawn(handshake(ctx.clone(), generation, request));
    Ok(())
}

async fn handshake(ctx: Arc<ConnContext>, generation: u64, request: Request) {
    let result = ctx.connector.connect(request).await;

    let mut core = ctx.lock();
    if ctx.generation.load(Ordering::Acquire) != generation {
        debug!(generation, "handshake superseded, discarding");
        return;
    }

    let events = match result {
        Ok((sink, stream)) => {
            let weak: Weak<ConnContext> = Arc::downgrade(&ctx);
            let hooks = ClientHooks {
                current_generation: ctx.generation.clone(),
                router: ctx.router.clone(),
                keepalive: ctx.config.keepalive.clone(),
                max_message_size: ctx.config.max_message_size,
                on_close: Box::new(move |info| {
                    if let Some(ctx) = weak.upgrade() {
                        handle_close(&ctx, generation, info);
                    }
                }),
            };
            let client = WsClient::spawn(generation, sink, stream, hooks);
            client.attach(&ctx.sender);
            core.client = Some(client);
            core.state = ConnectionState::Open;
            core.attempts = 0;
            ctx.set_status(ConnectionStatus::Online);
            info!(url = %ctx.config.url, generation, "channel open");

            ctx.router.initialize_modules(&ModuleContext {
                sender: ctx.sender.clone(),
            });
            vec![ConnectionEvent::Connected]
        }
        Err(e) => {
            warn!(url = %ctx.config.url, error = %e, "handshake failed");
            core.state = ConnectionState::Disconnected;
            let mut events = vec![ConnectionEvent::Error {
                message: e.to_string(),
            }];
            if core.ref_count > 0 {
                events.extend(schedule_reconnect(&ctx, &mut core));
            } else {
                ctx.set_status(ConnectionStatus::Offline);
            }
            events
        }
    };

    drop(core);
    ctx.emit(events);
}

/// Reacts to the end of the channel belonging to `generation`.
fn handle_close(ctx: &Arc<ConnContext>, generation: u64, info: CloseInfo) {
    let mut core = ctx.lock();
    if ctx.generation.load(Ordering::Acquire) != generation {
        if core.state == ConnectionState::Closing && core.closing == Some(generation) {
            debug!(generation, "locally closed channel wound down");
            core.closing = None;
            core.state = ConnectionState::Disconnected;
        } else {
            debug!(generation, "close from superseded channel, ignoring");
        }
        return;
    }

    if core
        .client
        .as_ref()
        .is_some_and(|c| c.generation() == generation)
    {
        core.client = None;
    }
    ctx.sender.detach(generation);
    core.state = ConnectionState::Disconnected;
    ctx.router.cleanup_modules();

    let will_reconnect = info.is_abnormal() && core.ref_count > 0 && !core.halted;
    info!(
        code = ?info.code,
        reason = %info.reason,
        will_reconnect,
        "channel closed"
    );

    let mut events = vec![ConnectionEvent::Disconnected {
        code: info.code,
        reason: info.reason,
        will_reconnect,
    }];
    if will_reconnect {
        events.extend(schedule_reconnect(ctx, &mut core));
    } else {
        ctx.set_status(ConnectionStatus::Offline);
    }

    drop(core);
    ctx.emit(events);
}

/// Closes the current channel (if any) from this side and supersedes its
/// generation. Returns the event to emit once the lock is released.
///
/// An open channel leaves the state at `Closing` until its read task
/// reports the close.
pub(crate) fn teardown(ctx: &ConnContext, core: &mut Core, reason: &str) -> Option<ConnectionEvent> {
    core.cancel_reconnect();
    ctx.generation.fetch_add(1, Ordering::AcqRel);
    ctx.sender.detach_all();

    let was_active = matches!(
        core.state,
        ConnectionState::Connecting | ConnectionState::Open
    );
    match core.client.take() {
        Some(client) => {
            client.close(CLOSE_NORMAL, reason);
            core.closing = Some(client.generation());
            core.state = ConnectionState::Closing;
        }
        None => core.state = ConnectionState::Disconnected,
    }
    ctx.set_status(ConnectionStatus::Offline);

    if !was_active {
        return None;
    }
    ctx.router.cleanup_modules();
    info!(reason, "channel closed locally");
    Some(ConnectionEvent::Disconnected {
        code: Some(CLOSE_NORMAL),
        reason: reason.to_owned(),
        will_reconnect: false,
    })
}

/// Counts a failed attempt and either schedules the next one or halts.
pub(crate) fn schedule_reconnect(ctx: &Arc<ConnContext>, core: &mut Core) -> Vec<ConnectionEvent> {
    core.cancel_reconnect();
    core.attempts = core.attempts.saturating_add(1);
    let max = ctx.config.reconnect.max_attempts;

    if core.attempts > max {
        core.halted = true;
        core.state = ConnectionState::Disconnected;
        ctx.set_status(ConnectionStatus::Lost);
        warn!(attempts = max, "max reconnect attempts reached, giving up");
        return vec![ConnectionEvent::MaxReconnectAttemptsReached { attempts: max }];
    }

    let attempt = core.attempts;
    let delay = ctx.config.reconnect.delay_for_attempt(attempt);
    let next_retry_secs = delay.as_secs_f64();
    let token = CancellationToken::new();
    core.reconnect = Some(token.clone());
    ctx.set_status(ConnectionStatus::Reconnecting {
        attempt,
        next_retry_secs,
    });
    info!(
        attempt,
        delay_secs = format_args!("{next_retry_secs:.1}"),
        "reconnecting"
    );

    tokio::spawn(reconnect_after(ctx.clone(), token, delay));
    vec![ConnectionEvent::Reconnecting {
        attempt,
        next_retry_secs,
    }]
}

async fn reconnect_after(ctx: Arc<ConnContext>, cancel: CancellationToken, delay: Duration) {
    tokio::select! {
        _ = cancel.cancelled() => {
            debug!("reconnect cancelled");
            return;
        }
        _ = tokio::time::sleep(delay) => {}
    }

    let mut core = ctx.lock();
    if cancel.is_cancelled() {
        return;
    }
    core.reconnect = None;
    if core.ref_count == 0 || core.halted || core.state != ConnectionState::Disconnected {
        debug!(state = ?core.state, "reconnect no longer needed");
        return;
    }

    let events = match begin_open(&ctx, &mut core) {
        Ok(()) => Vec::new(),
        Err(e) => {
            warn!(error = %e, "reconnect attempt failed");
            let mut events = vec![ConnectionEvent::Error {
                message: e.to_string(),
            }];
            events.extend(schedule_reconnect(&ctx, &mut core));
            events
        }
    };

    drop(core);
    ctx.emit(events);
}
