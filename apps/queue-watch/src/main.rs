//! `queue-watch`: mirrors a geoqueue upload queue over the realtime
//! channel and logs job activity until interrupted.
//!
//! ```text
//! queue-watch                      watch only
//! queue-watch delete 42            delete one item, then watch
//! queue-watch import 42            import one item, then watch
//! queue-watch bulk-delete 1 2 3    bulk delete over the channel
//! queue-watch bulk-import 1 2 3    bulk import over the channel
//! ```

mod config;
mod http;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use geoqueue_jobs::{QueueActions, QueueStore, SharedState, SyncState, default_registry};
use geoqueue_protocol::ItemId;
use geoqueue_realtime::{ConnectionEvent, ConnectionManager, ConnectionStatus, EventRouter};

use config::WatchConfig;
use http::HttpBackend;

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Watch,
    Delete(ItemId),
    Import(ItemId),
    BulkDelete(Vec<ItemId>),
    BulkImport(Vec<ItemId>),
}

fn parse_ids(args: &[String]) -> anyhow::Result<Vec<ItemId>> {
    if args.is_empty() {
        anyhow::bail!("expected at least one item id");
    }
    args.iter()
        .map(|a| a.parse::<ItemId>().with_context(|| format!("invalid item id `{a}`")))
        .collect()
}

fn parse_command(args: &[String]) -> anyhow::Result<Command> {
    let Some((verb, rest)) = args.split_first() else {
        return Ok(Command::Watch);
    };
    let single = |rest: &[String]| -> anyhow::Result<ItemId> {
        match parse_ids(rest)?.as_slice() {
            [id] => Ok(*id),
            _ => anyhow::bail!("`{verb}` takes exactly one item id"),
        }
    };
    match verb.as_str() {
        "watch" => Ok(Command::Watch),
        "delete" => Ok(Command::Delete(single(rest)?)),
        "import" => Ok(Command::Import(single(rest)?)),
        "bulk-delete" => Ok(Command::BulkDelete(parse_ids(rest)?)),
        "bulk-import" => Ok(Command::BulkImport(parse_ids(rest)?)),
        other => anyhow::bail!("unknown command `{other}`"),
    }
}

async fn run_command(actions: &QueueActions, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Watch => {}
        Command::Delete(id) => {
            let ticket = actions.delete_item(id).await?;
            info!(item = id, job_id = %ticket.job_id, "delete enqueued");
        }
        Command::Import(id) => {
            let ticket = actions.import_item(id, serde_json::json!({})).await?;
            info!(item = id, job_id = %ticket.job_id, "import enqueued");
        }
        Command::BulkDelete(ids) => {
            let selection = actions.select_for_bulk(ids)?;
            let request_id = actions.bulk_delete(selection)?;
            info!(%request_id, "bulk delete requested");
        }
        Command::BulkImport(ids) => {
            let selection = actions.select_for_bulk(ids)?;
            let request_id = actions.bulk_import(selection, serde_json::json!({}))?;
            info!(%request_id, "bulk import requested");
        }
    }
    Ok(())
}

fn log_queue(state: &SharedState) {
    let Ok(state) = state.lock() else {
        return;
    };
    let items = state.queue().items();
    info!(items = items.len(), active_jobs = state.tracker().len(), "queue");
    for item in items {
        info!(
            id = item.id(),
            filename = %item.record.filename,
            deleting = item.flags.deleting,
            importing = item.flags.importing,
            progress = ?item.flags.progress,
            error = ?item.flags.error,
            "item"
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,geoqueue=debug")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_command(&args)?;

    let cfg = WatchConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        WatchConfig::default()
    });
    info!(endpoint = %cfg.endpoint, api = %cfg.api_base, "starting queue-watch");

    let state = SyncState::shared(cfg.reconcile.clone());
    let router = Arc::new(EventRouter::new());
    router.install_all(default_registry().load_all_modules(&state));
    router.on_lifecycle(None, |event| match event {
        ConnectionEvent::MaxReconnectAttemptsReached { attempts } => {
            warn!(attempts, "giving up on the realtime channel")
        }
        other => info!(event = ?other, "connection event"),
    });

    let manager = ConnectionManager::with_tungstenite(cfg.manager_config(), router);
    let backend = Arc::new(HttpBackend::new(reqwest::Client::new(), &cfg.api_base)?);
    let actions = QueueActions::new(state.clone(), backend, manager.sender());

    if let Err(e) = manager.connect() {
        warn!(error = %e, "initial connect failed, retrying in background");
    }
    let cancel = CancellationToken::new();
    let refresh =
        geoqueue_jobs::spawn_periodic_refresh(actions.clone(), &cfg.reconcile, cancel.clone());

    let mut status = manager.status();
    let mut pending = Some(command).filter(|c| *c != Command::Watch);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!(status = %serde_json::to_string(&current)?, "connection status");

                if current == ConnectionStatus::Online
                    && let Some(command) = pending.take()
                {
                    if let Err(e) = actions.refresh().await {
                        warn!(error = %e, "snapshot before command failed");
                    }
                    if let Err(e) = run_command(&actions, command).await {
                        warn!(error = %e, "command failed");
                    }
                }
                if current == ConnectionStatus::Lost {
                    log_queue(&state);
                }
            }
        }
    }

    info!("shutting down");
    cancel.cancel();
    manager.force_disconnect();
    if let Some(handle) = refresh {
        let _ = handle.await;
    }
    log_queue(&state);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command(&[]).unwrap(), Command::Watch);
        assert_eq!(parse_command(&args(&["delete", "42"])).unwrap(), Command::Delete(42));
        assert_eq!(
            parse_command(&args(&["bulk-delete", "1", "2", "3"])).unwrap(),
            Command::BulkDelete(vec![1, 2, 3])
        );
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse_command(&args(&["delete"])).is_err());
        assert!(parse_command(&args(&["delete", "1", "2"])).is_err());
        assert!(parse_command(&args(&["import", "abc"])).is_err());
        assert!(parse_command(&args(&["purge"])).is_err());
    }
}
