//! WebSocket read pump: parses frames and hands them to the router.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use geoqueue_protocol::Frame;
use geoqueue_protocol::constants::FRAME_PING;

use crate::router::EventRouter;
use crate::types::CloseInfo;

pub(crate) struct ReadContext {
    pub generation: u64,
    pub current_generation: Arc<AtomicU64>,
    pub router: Arc<EventRouter>,
    pub write_tx: mpsc::Sender<tungstenite::Message>,
    pub max_message_size: usize,
    /// Set by whoever closes the channel from this side.
    pub local_close: Arc<Mutex<Option<CloseInfo>>>,
}

/// Reads messages until the channel ends and returns how it ended.
///
/// A locally initiated close wins over whatever the peer reports.
pub(crate) async fn read_pump<S>(mut read: S, ctx: ReadContext, cancel: CancellationToken) -> CloseInfo
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let mut remote: Option<CloseInfo> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            msg = read.next() => {
                match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        handle_text_message(&text, &ctx);
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        trace!("received ws ping, sending pong");
                        let _ = ctx.write_tx.try_send(tungstenite::Message::Pong(data));
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let info = match frame {
                            Some(f) => CloseInfo::new(u16::from(f.code), f.reason.as_str()),
                            None => CloseInfo::lost("closed without status"),
                        };
                        debug!(code = ?info.code, reason = %info.reason, "received close frame");
                        remote = Some(info);
                        break;
                    }
                    Some(Ok(_)) => {} // Binary and pong: ignore
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        remote = Some(CloseInfo::lost(e.to_string()));
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    let local = ctx.local_close.lock().ok().and_then(|mut s| s.take());
    local
        .or(remote)
        .unwrap_or_else(|| CloseInfo::lost("connection lost"))
}

/// Handles a text message from the WebSocket.
fn handle_text_message(text: &str, ctx: &ReadContext) {
    if text.len() > ctx.max_message_size {
        warn!("message too large ({} bytes), dropping", text.len());
        return;
    }

    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to parse frame: {e}");
            return;
        }
    };

    if frame.frame_type == FRAME_PING {
        if let Ok(pong) = Frame::pong().to_json() {
            let _ = ctx.write_tx.try_send(tungstenite::Message::Text(pong.into()));
        }
    }

    if ctx.current_generation.load(Ordering::Acquire) != ctx.generation {
        trace!(generation = ctx.generation, "frame from superseded channel, dropping");
        return;
    }

    trace!(module = ?frame.module, frame_type = %frame.frame_type, "received frame");
    ctx.router.dispatch(&frame);
}
