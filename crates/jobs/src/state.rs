//! Shared application state the realtime handlers mutate.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, trace};

use geoqueue_protocol::{ItemId, ItemRecord, JobEvent, JobKind, QueueEvent};

use crate::error::JobError;
use crate::queue::{Queue, QueueStore};
use crate::reconciler::{ReconcileConfig, ReconcileOutcome, Reconciler};
use crate::tracker::{Applied, JobTracker, TrackerEffect};

/// State shared by every module handler and the actions layer.
pub type SharedState = Arc<Mutex<SyncState>>;

/// Locks shared state, mapping poisoning to [`JobError::Poisoned`].
pub fn lock(state: &SharedState) -> Result<MutexGuard<'_, SyncState>, JobError> {
    state.lock().map_err(|_| JobError::Poisoned)
}

/// Result of applying a `queue` module event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueOutcome {
    /// The collection changed in a way that warrants a full refresh.
    pub refresh: bool,
    pub reconciled: ReconcileOutcome,
}

/// Queue collection, active jobs and pending deletes, kept consistent.
///
/// Item flags are only ever written by [`project`](Self::project), from
/// tracker state.
#[derive(Debug)]
pub struct SyncState<Q = Queue> {
    queue: Q,
    tracker: JobTracker,
    reconciler: Reconciler,
}

impl SyncState<Queue> {
    pub fn new(config: ReconcileConfig) -> Self {
        Self::with_store(Queue::new(), config)
    }

    /// Wraps a fresh state for sharing between handlers.
    pub fn shared(config: ReconcileConfig) -> SharedState {
        Arc::new(Mutex::new(Self::new(config)))
    }
}

impl Default for SyncState<Queue> {
    fn default() -> Self {
        Self::new(ReconcileConfig::default())
    }
}

impl<Q: QueueStore> SyncState<Q> {
    pub fn with_store(queue: Q, config: ReconcileConfig) -> Self {
        Self {
            queue,
            tracker: JobTracker::new(),
            reconciler: Reconciler::new(config),
        }
    }

    pub fn queue(&self) -> &Q {
        &self.queue
    }

    pub fn tracker(&self) -> &JobTracker {
        &self.tracker
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    /// Replaces the collection with an authoritative snapshot and resolves
    /// pending deletes against it.
    pub fn apply_snapshot(&mut self, records: Vec<ItemRecord>) -> ReconcileOutcome {
        let present: BTreeSet<ItemId> = records.iter().map(|r| r.id).collect();
        let outcome = self.reconciler.reconcile(&present);
        for id in &outcome.restored {
            self.tracker.abandon_delete(*id);
        }
        // Confirmed deletes are among these.
        let vanished: BTreeSet<ItemId> = self
            .tracker
            .targets()
            .difference(&present)
            .copied()
            .collect();
        if !vanished.is_empty() {
            trace!(vanished = vanished.len(), "dropping jobs for vanished items");
            self.tracker.forget_items(&vanished);
        }

        debug!(items = records.len(), "applying snapshot");
        self.queue.set_queue(records);
        self.project_all();
        outcome
    }

    /// Applies an event of the job module for `kind`.
    pub fn apply_job_event(&mut self, kind: JobKind, event: &JobEvent) -> Applied {
        let applied = self.tracker.apply(kind, event);

        if kind.is_delete() && matches!(event, JobEvent::Started(_) | JobEvent::StatusUpdated(_)) {
            // Deletes announced by the server are reconciled like our own.
            for id in &applied.touched {
                self.reconciler.track_delete(*id);
            }
            self.reconciler.touch(&applied.touched);
        }
        for effect in &applied.effects {
            match effect {
                TrackerEffect::Remove(ids) => {
                    let removed = self.queue.remove_items(ids);
                    trace!(removed, "removed deleted items");
                    self.reconciler.forget(ids);
                }
                TrackerEffect::Failed { targets, .. } => {
                    if kind.is_delete() {
                        self.reconciler.forget(targets);
                    }
                }
                TrackerEffect::Refresh => {}
            }
        }

        self.project(&applied.touched);
        applied
    }

    /// Applies an event of the `queue` module.
    pub fn apply_queue_event(&mut self, event: QueueEvent) -> QueueOutcome {
        match event {
            QueueEvent::InitialState(snapshot) => QueueOutcome {
                refresh: false,
                reconciled: self.apply_snapshot(snapshot.items),
            },
            QueueEvent::ItemAdded(added) => {
                let id = added.item.id;
                self.queue.add_item(added.item);
                self.project(&BTreeSet::from([id]));
                QueueOutcome {
                    refresh: true,
                    ..Default::default()
                }
            }
            QueueEvent::ItemDeleted(deleted) => self.forget_items(BTreeSet::from([deleted.item_id])),
            QueueEvent::ItemsDeleted(deleted) => {
                self.forget_items(deleted.item_ids.into_iter().collect())
            }
            QueueEvent::ItemImported(imported) => {
                match imported.item {
                    Some(record) => {
                        self.queue.update_item(record);
                    }
                    None => {
                        if let Some(mut record) =
                            self.queue.get(imported.item_id).map(|i| i.record.clone())
                        {
                            record.record_count = imported.record_count.or(record.record_count);
                            self.queue.update_item(record);
                        }
                    }
                }
                QueueOutcome::default()
            }
        }
    }

    fn forget_items(&mut self, ids: BTreeSet<ItemId>) -> QueueOutcome {
        self.queue.remove_items(&ids);
        self.reconciler.forget(&ids);
        self.tracker.forget_items(&ids);
        QueueOutcome {
            refresh: true,
            ..Default::default()
        }
    }

    /// Rejects items that are unknown or already busy.
    pub fn check_actionable(&self, items: &BTreeSet<ItemId>) -> Result<(), JobError> {
        if items.is_empty() {
            return Err(JobError::EmptySelection);
        }
        if let Some(&missing) = items.iter().find(|id| !self.queue.contains(**id)) {
            return Err(JobError::UnknownItem(missing));
        }
        self.tracker.check_available(items)
    }

    /// Registers a job this client is about to trigger.
    pub fn begin_job(
        &mut self,
        kind: JobKind,
        request_id: &str,
        targets: BTreeSet<ItemId>,
    ) -> Result<(), JobError> {
        self.check_actionable(&targets)?;
        let touched = self.tracker.begin(kind, request_id, targets)?;
        if kind.is_delete() {
            for id in &touched {
                self.reconciler.track_delete(*id);
            }
        }
        self.project(&touched);
        Ok(())
    }

    /// Re-keys a requested job to the id the server returned for it.
    pub fn confirm_job(&mut self, request_id: &str, job_id: &str) {
        let touched = self.tracker.confirm(request_id, job_id);
        self.project(&touched);
    }

    /// Drops a requested job whose trigger never reached the server.
    pub fn cancel_job(&mut self, request_id: &str) {
        let touched = self.tracker.cancel(request_id);
        self.reconciler.forget(&touched);
        self.project(&touched);
    }

    /// Rewrites derived flags for `items` from tracker state.
    pub fn project(&mut self, items: &BTreeSet<ItemId>) {
        for &id in items {
            let flags = self.tracker.flags_for(id);
            self.queue.set_flags(id, flags);
        }
    }

    fn project_all(&mut self) {
        let ids = self.queue.ids();
        self.project(&ids);
    }
}
