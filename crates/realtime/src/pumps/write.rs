//! WebSocket write pump: serialises outbound messages.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Writes queued messages to the WebSocket.
///
/// Messages already queued when `cancel` fires are still flushed, so a
/// close frame queued right before cancellation reaches the peer. The pump
/// stops after writing a close frame and sends a bare one on exit if none
/// was written.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut close_sent = false;

    loop {
        tokio::select! {
            biased;
            msg = write_rx.recv() => {
                let Some(m) = msg else { break };
                let is_close = matches!(m, tungstenite::Message::Close(_));
                if let Err(e) = write.send(m).await {
                    error!("WebSocket write error: {e}");
                    return;
                }
                if is_close {
                    trace!("close frame written");
                    close_sent = true;
                    break;
                }
            }
            _ = cancel.cancelled() => break,
        }
    }

    if !close_sent {
        let _ = write.send(tungstenite::Message::Close(None)).await;
    }
}
