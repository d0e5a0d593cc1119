//! Keepalive pump: application-level `ping` frames with a pong deadline.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use geoqueue_protocol::Frame;
use geoqueue_protocol::constants::CLOSE_HEARTBEAT_TIMEOUT;

use crate::heartbeat::Heartbeat;
use crate::types::{CloseInfo, KeepaliveConfig};

const HEARTBEAT_TIMEOUT_REASON: &str = "heartbeat timeout";

/// Sends a `ping` every `interval` and closes the channel with code 4000
/// when the matching `pong` does not arrive within `pong_timeout`.
pub(crate) async fn ping_pump(
    write_tx: mpsc::Sender<tungstenite::Message>,
    heartbeat: Heartbeat,
    config: KeepaliveConfig,
    local_close: Arc<Mutex<Option<CloseInfo>>>,
    cancel: CancellationToken,
) {
    let ping_text = match Frame::ping().to_json() {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to encode ping frame: {e}");
            return;
        }
    };

    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let sent_at = Instant::now();
                let ping = tungstenite::Message::Text(ping_text.clone().into());
                if write_tx.send(ping).await.is_err() {
                    break;
                }
                trace!("ping sent");

                let acked = tokio::select! {
                    _ = cancel.cancelled() => break,
                    acked = heartbeat.wait_for_pong(sent_at, config.pong_timeout) => acked,
                };
                if !acked {
                    warn!(
                        timeout_secs = config.pong_timeout.as_secs_f64(),
                        "no pong received, closing channel"
                    );
                    if let Ok(mut slot) = local_close.lock() {
                        slot.get_or_insert_with(|| {
                            CloseInfo::new(CLOSE_HEARTBEAT_TIMEOUT, HEARTBEAT_TIMEOUT_REASON)
                        });
                    }
                    let frame = CloseFrame {
                        code: CloseCode::from(CLOSE_HEARTBEAT_TIMEOUT),
                        reason: HEARTBEAT_TIMEOUT_REASON.into(),
                    };
                    let _ = write_tx.try_send(tungstenite::Message::Close(Some(frame)));
                    cancel.cancel();
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn config() -> KeepaliveConfig {
        KeepaliveConfig {
            interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn ping_pump_stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(ping_pump(
            tx,
            Heartbeat::new(),
            config(),
            Arc::new(Mutex::new(None)),
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pong_closes_with_4000() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let local_close = Arc::new(Mutex::new(None));

        let handle = tokio::spawn(ping_pump(
            tx,
            Heartbeat::new(),
            config(),
            local_close.clone(),
            cancel.clone(),
        ));

        match rx.recv().await {
            Some(tungstenite::Message::Text(text)) => assert_eq!(text.as_str(), r#"{"type":"ping"}"#),
            other => panic!("expected ping, got {other:?}"),
        }
        match rx.recv().await {
            Some(tungstenite::Message::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), 4000);
                assert_eq!(frame.reason.as_str(), "heartbeat timeout");
            }
            other => panic!("expected close, got {other:?}"),
        }

        handle.await.unwrap();
        assert!(cancel.is_cancelled());
        assert_eq!(
            local_close.lock().unwrap().clone(),
            Some(CloseInfo::new(4000, "heartbeat timeout"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn answered_pings_keep_channel_open() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let heartbeat = Heartbeat::new();

        let handle = tokio::spawn(ping_pump(
            tx,
            heartbeat.clone(),
            config(),
            Arc::new(Mutex::new(None)),
            cancel.clone(),
        ));

        for _ in 0..3 {
            match rx.recv().await {
                Some(tungstenite::Message::Text(_)) => heartbeat.record_pong(),
                other => panic!("expected ping, got {other:?}"),
            }
        }
        assert!(!cancel.is_cancelled());

        cancel.cancel();
        handle.await.unwrap();
    }
}
