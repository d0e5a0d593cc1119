//! Last-pong bookkeeping shared between the router and the ping pump.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

/// Records when the last keepalive acknowledgment arrived.
///
/// The router calls [`record_pong`](Self::record_pong) when it consumes a
/// `pong` frame; the ping pump waits on [`wait_for_pong`](Self::wait_for_pong)
/// after each `ping`.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    last_pong: Arc<watch::Sender<Option<Instant>>>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            last_pong: Arc::new(tx),
        }
    }

    /// Marks a pong as received now.
    pub fn record_pong(&self) {
        self.last_pong.send_replace(Some(Instant::now()));
    }

    /// Time of the most recent pong, if any.
    pub fn last_pong(&self) -> Option<Instant> {
        *self.last_pong.borrow()
    }

    /// Waits until a pong at or after `sent_at` is recorded.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_pong(&self, sent_at: Instant, timeout: Duration) -> bool {
        let mut rx = self.last_pong.subscribe();
        let acked = rx.wait_for(|last| last.is_some_and(|t| t >= sent_at));
        matches!(tokio::time::timeout(timeout, acked).await, Ok(Ok(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pong_after_ping_acknowledges() {
        let hb = Heartbeat::new();
        let sent_at = Instant::now();

        let waiter = {
            let hb = hb.clone();
            tokio::spawn(async move { hb.wait_for_pong(sent_at, Duration::from_secs(10)).await })
        };
        tokio::time::sleep(Duration::from_secs(3)).await;
        hb.record_pong();

        assert!(waiter.await.unwrap());
        assert!(hb.last_pong().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_pong_does_not_acknowledge() {
        let hb = Heartbeat::new();
        hb.record_pong();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let sent_at = Instant::now();
        assert!(!hb.wait_for_pong(sent_at, Duration::from_secs(10)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_pong() {
        let hb = Heartbeat::new();
        let start = Instant::now();
        assert!(!hb.wait_for_pong(start, Duration::from_secs(10)).await);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }
}
