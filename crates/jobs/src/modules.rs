//! Realtime modules binding server events to [`SyncState`].
//!
//! One `queue` module keeps the collection in sync; one job module per
//! [`JobKind`] folds job events into the tracker. All of them share the
//! same [`SharedState`].

use std::sync::{Arc, OnceLock};

use tracing::{debug, trace};

use geoqueue_protocol::{Frame, JobEvent, JobKind, ModuleName, QueueEvent};
use geoqueue_realtime::{
    FrameSender, HandlerError, ModuleContext, ModuleEntry, ModuleError, ModuleRegistry,
    RealtimeModule, Subscription,
};

use crate::state::{SharedState, SyncState};

fn lock_state(state: &SharedState) -> Result<std::sync::MutexGuard<'_, SyncState>, HandlerError> {
    state
        .lock()
        .map_err(|_| HandlerError::Failed("sync state lock poisoned".into()))
}

/// Fire-and-forget refresh through the sender captured on `initialize`.
fn request_refresh(sender: &OnceLock<FrameSender>, module: &'static str) {
    match sender.get() {
        Some(sender) => {
            if let Err(e) = sender.request_refresh(ModuleName::Queue) {
                debug!(module, error = %e, "refresh request not sent");
            }
        }
        None => debug!(module, "refresh requested before channel opened"),
    }
}

/// Handles the `queue` module: snapshots and collection pushes.
pub struct QueueModule {
    state: SharedState,
    sender: OnceLock<FrameSender>,
}

impl QueueModule {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            sender: OnceLock::new(),
        }
    }

    fn handle(&self, frame: &Frame) -> Result<(), HandlerError> {
        let event = QueueEvent::decode(frame)?;
        trace!(event_type = %frame.frame_type, "queue event");
        let outcome = lock_state(&self.state)?.apply_queue_event(event);
        if !outcome.reconciled.is_empty() {
            debug!(
                confirmed = outcome.reconciled.confirmed.len(),
                restored = outcome.reconciled.restored.len(),
                "pending deletes reconciled"
            );
        }
        if outcome.refresh {
            request_refresh(&self.sender, self.name());
        }
        Ok(())
    }
}

impl RealtimeModule for QueueModule {
    fn name(&self) -> &'static str {
        ModuleName::Queue.as_str()
    }

    fn subscriptions(self: Arc<Self>) -> Vec<Subscription> {
        QueueEvent::TYPES
            .iter()
            .map(|&event_type| {
                let module = self.clone();
                Subscription::new(event_type, move |frame| module.handle(frame))
            })
            .collect()
    }

    fn initialize(&self, ctx: &ModuleContext) {
        let sender = self.sender.get_or_init(|| ctx.sender.clone());
        // Resynchronise after every (re)connect.
        if let Err(e) = sender.request_refresh(ModuleName::Queue) {
            debug!(error = %e, "initial refresh not sent");
        }
    }
}

/// Handles one job module (`upload`, `delete`, `bulk_import`,
/// `bulk_delete`).
pub struct JobModule {
    kind: JobKind,
    state: SharedState,
    sender: OnceLock<FrameSender>,
}

impl JobModule {
    pub fn new(kind: JobKind, state: SharedState) -> Self {
        Self {
            kind,
            state,
            sender: OnceLock::new(),
        }
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    fn handle(&self, frame: &Frame) -> Result<(), HandlerError> {
        let event = JobEvent::decode(self.kind.module(), frame)?;
        trace!(kind = %self.kind, job_id = event.job_id(), event_type = %frame.frame_type, "job event");
        let applied = lock_state(&self.state)?.apply_job_event(self.kind, &event);
        if applied.needs_refresh() {
            request_refresh(&self.sender, self.name());
        }
        Ok(())
    }
}

impl RealtimeModule for JobModule {
    fn name(&self) -> &'static str {
        self.kind.as_str()
    }

    fn subscriptions(self: Arc<Self>) -> Vec<Subscription> {
        JobEvent::TYPES
            .iter()
            .map(|&event_type| {
                let module = self.clone();
                Subscription::new(event_type, move |frame| module.handle(frame))
            })
            .collect()
    }

    fn initialize(&self, ctx: &ModuleContext) {
        self.sender.get_or_init(|| ctx.sender.clone());
    }
}

fn queue_module(state: &SharedState) -> Result<Arc<dyn RealtimeModule>, ModuleError> {
    Ok(Arc::new(QueueModule::new(state.clone())))
}

fn upload_module(state: &SharedState) -> Result<Arc<dyn RealtimeModule>, ModuleError> {
    Ok(Arc::new(JobModule::new(JobKind::Upload, state.clone())))
}

fn delete_module(state: &SharedState) -> Result<Arc<dyn RealtimeModule>, ModuleError> {
    Ok(Arc::new(JobModule::new(JobKind::Delete, state.clone())))
}

fn bulk_import_module(state: &SharedState) -> Result<Arc<dyn RealtimeModule>, ModuleError> {
    Ok(Arc::new(JobModule::new(JobKind::BulkImport, state.clone())))
}

fn bulk_delete_module(state: &SharedState) -> Result<Arc<dyn RealtimeModule>, ModuleError> {
    Ok(Arc::new(JobModule::new(JobKind::BulkDelete, state.clone())))
}

/// Every module a geoqueue client installs.
pub fn default_registry() -> ModuleRegistry<SharedState> {
    ModuleRegistry::new(vec![
        ModuleEntry {
            name: ModuleName::Queue.as_str(),
            factory: queue_module,
        },
        ModuleEntry {
            name: ModuleName::Upload.as_str(),
            factory: upload_module,
        },
        ModuleEntry {
            name: ModuleName::Delete.as_str(),
            factory: delete_module,
        },
        ModuleEntry {
            name: ModuleName::BulkImport.as_str(),
            factory: bulk_import_module,
        },
        ModuleEntry {
            name: ModuleName::BulkDelete.as_str(),
            factory: bulk_delete_module,
        },
    ])
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use geoqueue_protocol::ItemRecord;
    use geoqueue_realtime::{EventRouter, Routed, WsMessage};
    use tokio::sync::mpsc;

    use super::*;
    use crate::queue::QueueStore;
    use crate::reconciler::ReconcileConfig;

    struct Harness {
        state: SharedState,
        router: EventRouter,
        outbound: mpsc::Receiver<WsMessage>,
    }

    fn harness() -> Harness {
        let state = SyncState::shared(ReconcileConfig::default());
        let router = EventRouter::new();
        let modules = default_registry().load_all_modules(&state);
        let (tx, outbound) = mpsc::channel(16);
        let ctx = ModuleContext {
            sender: FrameSender::attached(tx),
        };
        for module in &modules {
            module.initialize(&ctx);
        }
        router.install_all(modules);
        Harness {
            state,
            router,
            outbound,
        }
    }

    impl Harness {
        fn push(&self, json: &str) -> Routed {
            self.router.dispatch_text(json)
        }

        fn outbound_types(&mut self) -> Vec<String> {
            let mut types = Vec::new();
            while let Ok(msg) = self.outbound.try_recv() {
                if let WsMessage::Text(text) = msg {
                    let frame: Frame = serde_json::from_str(text.as_str()).unwrap();
                    types.push(format!("{}:{}", frame.module.unwrap_or_default(), frame.frame_type));
                }
            }
            types
        }

        fn seed(&mut self, ids: &[i64]) {
            let items: Vec<_> = ids
                .iter()
                .map(|&id| ItemRecord::new(id, format!("f{id}.gpkg")))
                .collect();
            self.state.lock().unwrap().apply_snapshot(items);
            self.outbound_types();
        }

        fn ids(&self) -> BTreeSet<i64> {
            self.state.lock().unwrap().queue().ids()
        }
    }

    #[test]
    fn registry_lists_all_modules() {
        assert_eq!(
            default_registry().names(),
            vec!["queue", "upload", "delete", "bulk_import", "bulk_delete"]
        );
    }

    #[test]
    fn queue_module_requests_refresh_on_initialize() {
        let mut h = harness();
        assert_eq!(h.outbound_types(), vec!["queue:refresh"]);
    }

    #[test]
    fn bulk_delete_push_sequence_removes_items() {
        let mut h = harness();
        h.seed(&[1, 2, 3, 4]);

        h.push(r#"{"module":"bulk_delete","type":"started","data":{"job_id":"bd-1","item_ids":[1,2,3]}}"#);
        h.push(r#"{"module":"bulk_delete","type":"status_updated","data":{"job_id":"bd-1","completed_item_ids":[2],"current_item_id":3,"total":3}}"#);
        let routed = h.push(
            r#"{"module":"bulk_delete","type":"completed","data":{"job_id":"bd-1","item_ids":[1,2,3]}}"#,
        );

        assert_eq!(routed, Routed::Delivered { handlers: 1, failed: 0 });
        assert_eq!(h.ids(), BTreeSet::from([4]));
        assert!(h.outbound_types().is_empty());
    }

    #[test]
    fn import_completion_requests_refresh() {
        let mut h = harness();
        h.seed(&[8]);
        h.push(r#"{"module":"upload","type":"started","data":{"job_id":"u-1","item_id":8}}"#);
        h.push(r#"{"module":"upload","type":"completed","data":{"job_id":"u-1","item_id":8}}"#);
        assert_eq!(h.outbound_types(), vec!["queue:refresh"]);
    }

    #[test]
    fn item_added_push_requests_refresh() {
        let mut h = harness();
        h.outbound_types();
        h.push(r#"{"module":"queue","type":"item_added","data":{"item":{"id":5,"filename":"roads.shp"}}}"#);
        assert_eq!(h.ids(), BTreeSet::from([5]));
        assert_eq!(h.outbound_types(), vec!["queue:refresh"]);
    }

    #[test]
    fn unknown_pairs_are_dropped_without_mutation() {
        let mut h = harness();
        h.seed(&[1, 2]);
        let before = format!("{:?}", h.state.lock().unwrap());

        assert_eq!(
            h.push(r#"{"module":"tiles","type":"started","data":{"job_id":"x","item_id":1}}"#),
            Routed::Dropped
        );
        assert_eq!(
            h.push(r#"{"module":"delete","type":"archived","data":{"job_id":"x","item_id":1}}"#),
            Routed::Dropped
        );
        // Known pair, unusable payload: the handler fails, nothing changes.
        assert_eq!(
            h.push(r#"{"module":"delete","type":"started","data":{"item_id":1}}"#),
            Routed::Delivered { handlers: 1, failed: 1 }
        );

        assert_eq!(format!("{:?}", h.state.lock().unwrap()), before);
        assert!(h.outbound_types().is_empty());
    }
}
