//! Optional periodic resync against the backend.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::QueueActions;
use crate::reconciler::ReconcileConfig;

/// Fetches the collection every `interval` until `cancel` fires. Failed
/// fetches are logged and retried on the next tick.
pub async fn run_periodic_refresh(
    actions: QueueActions,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; the initial snapshot comes from the
    // channel.
    ticker.tick().await;

    info!(interval_secs = interval.as_secs_f64(), "periodic refresh started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("periodic refresh stopped");
                return;
            }
            _ = ticker.tick() => {}
        }

        match actions.refresh().await {
            Ok(outcome) if !outcome.is_empty() => debug!(
                confirmed = outcome.confirmed.len(),
                restored = outcome.restored.len(),
                "periodic refresh reconciled deletes"
            ),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "periodic refresh failed"),
        }
    }
}

/// Spawns [`run_periodic_refresh`] if `config` enables it.
pub fn spawn_periodic_refresh(
    actions: QueueActions,
    config: &ReconcileConfig,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    let interval = config.refresh_interval.filter(|d| !d.is_zero())?;
    Some(tokio::spawn(run_periodic_refresh(actions, interval, cancel)))
}
