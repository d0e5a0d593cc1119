//! WebSocket client for one physical channel.
//!
//! A [`WsClient`] owns the three pumps of a single open connection (read,
//! write, keepalive) and reports exactly once, through
//! [`ClientHooks::on_close`], how the channel ended. It knows nothing about
//! reference counting or reconnection; that lives in the manager.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use futures_util::{Sink, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pumps::read::ReadContext;
use crate::router::EventRouter;
use crate::sender::FrameSender;
use crate::types::{CloseInfo, KeepaliveConfig};

/// Errors from the WebSocket transport.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

/// Inbound half of a channel.
pub type WsStream =
    Pin<Box<dyn Stream<Item = Result<tungstenite::Message, tungstenite::Error>> + Send>>;

/// Outbound half of a channel.
pub type WsSink = Pin<Box<dyn Sink<tungstenite::Message, Error = tungstenite::Error> + Send>>;

/// Future returned by [`Connector::connect`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<(WsSink, WsStream), WsError>> + Send>>;

/// Opens framed duplex channels.
///
/// The manager only ever talks to this trait, so tests and alternative
/// transports can hand it in-memory channels.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, request: Request) -> ConnectFuture;
}

/// Default [`Connector`] over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    pub max_message_size: usize,
}

impl Connector for TungsteniteConnector {
    fn connect(&self, request: Request) -> ConnectFuture {
        let max = self.max_message_size;
        Box::pin(async move {
            let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
            ws_config.max_message_size = Some(max);
            ws_config.max_frame_size = Some(max);
            let (ws_stream, _) =
                tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false)
                    .await?;
            let (write, read) = ws_stream.split();
            let sink: WsSink = Box::pin(write);
            let stream: WsStream = Box::pin(read);
            Ok((sink, stream))
        })
    }
}

/// Validates `url` and turns it into a handshake request.
///
/// Failures here are synchronous and never reach the network.
pub fn build_request(url: &str) -> Result<Request, WsError> {
    let scheme_ok = url.starts_with("ws://") || url.starts_with("wss://");
    if !scheme_ok {
        return Err(WsError::InvalidEndpoint(format!(
            "expected ws:// or wss:// URL, got `{url}`"
        )));
    }
    url.into_client_request()
        .map_err(|e| WsError::InvalidEndpoint(e.to_string()))
}

/// Everything a client needs from its owner.
pub(crate) struct ClientHooks {
    /// Generation of the manager's current channel; frames are dispatched
    /// only while it still equals this client's generation.
    pub current_generation: Arc<AtomicU64>,
    pub router: Arc<EventRouter>,
    pub keepalive: KeepaliveConfig,
    pub max_message_size: usize,
    /// Called once, from the read task, when the channel has ended.
    pub on_close: Box<dyn FnOnce(CloseInfo) + Send>,
}

/// A single open channel and its pumps.
pub(crate) struct WsClient {
    generation: u64,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
    local_close: Arc<Mutex<Option<CloseInfo>>>,
    _read_handle: JoinHandle<()>,
    _write_handle: JoinHandle<()>,
    _ping_handle: JoinHandle<()>,
}

impl WsClient {
    /// Starts the pumps over an already-established channel.
    pub(crate) fn spawn(generation: u64, sink: WsSink, stream: WsStream, hooks: ClientHooks) -> Self {
        let (write_tx, write_rx) = mpsc::channel::<tungstenite::Message>(256);
        let cancel = CancellationToken::new();
        let local_close: Arc<Mutex<Option<CloseInfo>>> = Arc::new(Mutex::new(None));

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(sink, write_rx, cancel))
        };

        let ping_handle = {
            let write_tx = write_tx.clone();
            let heartbeat = hooks.router.heartbeat().clone();
            let local_close = local_close.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::ping::ping_pump(
                write_tx,
                heartbeat,
                hooks.keepalive.clone(),
                local_close,
                cancel,
            ))
        };

        let read_handle = {
            let ctx = ReadContext {
                generation,
                current_generation: hooks.current_generation,
                router: hooks.router,
                write_tx: write_tx.clone(),
                max_message_size: hooks.max_message_size,
                local_close: local_close.clone(),
            };
            let cancel = cancel.clone();
            let on_close = hooks.on_close;
            tokio::spawn(async move {
                let info = crate::pumps::read::read_pump(stream, ctx, cancel.clone()).await;
                cancel.cancel();
                on_close(info);
            })
        };

        Self {
            generation,
            write_tx,
            cancel,
            local_close,
            _read_handle: read_handle,
            _write_handle: write_handle,
            _ping_handle: ping_handle,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Makes `sender` target this channel.
    pub(crate) fn attach(&self, sender: &FrameSender) {
        sender.attach(self.generation, self.write_tx.clone());
    }

    /// Closes the channel with `code`. The read task still reports the
    /// close through `on_close`, carrying this code.
    pub(crate) fn close(&self, code: u16, reason: &str) {
        if let Ok(mut slot) = self.local_close.lock() {
            slot.get_or_insert_with(|| CloseInfo::new(code, reason));
        }
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_owned().into(),
        };
        if self
            .write_tx
            .try_send(tungstenite::Message::Close(Some(frame)))
            .is_err()
        {
            debug!(generation = self.generation, "close frame not queued");
        }
        self.cancel.cancel();
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        // Pumps wind down on their own so the write pump can flush the
        // close frame.
        self.cancel.cancel();
    }
}
