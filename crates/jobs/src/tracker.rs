//! Job lifecycle tracker.
//!
//! Folds `started → status_updated* → completed | failed` events into a set
//! of active jobs and derives per-item flags from them. Terminal events are
//! idempotent: a bounded memory of finished job ids makes duplicates and
//! stragglers no-ops.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, info, warn};

use geoqueue_protocol::{ItemId, JobEvent, JobKind, JobStatus};

use crate::error::JobError;
use crate::job::{Job, Progress};
use crate::queue::ItemFlags;

/// How many finished job ids are remembered for deduplication.
pub const FINISHED_MEMORY: usize = 256;

/// Follow-up work a job event asks of the surrounding state.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEffect {
    /// Delete finished: drop these items from the collection.
    Remove(BTreeSet<ItemId>),
    /// Import finished: server-computed fields changed, fetch a fresh
    /// snapshot instead of guessing them.
    Refresh,
    /// Job failed; items stay visible with the error attached.
    Failed {
        targets: BTreeSet<ItemId>,
        error: String,
    },
}

/// Result of applying one job event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    /// Items whose derived flags may have changed.
    pub touched: BTreeSet<ItemId>,
    pub effects: Vec<TrackerEffect>,
}

impl Applied {
    pub fn is_noop(&self) -> bool {
        self.touched.is_empty() && self.effects.is_empty()
    }

    pub fn needs_refresh(&self) -> bool {
        self.effects.contains(&TrackerEffect::Refresh)
    }
}

/// Bounded FIFO set of job ids.
#[derive(Debug, Clone)]
struct FinishedIds {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl FinishedIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    fn insert(&mut self, id: String) {
        if !self.ids.insert(id.clone()) {
            return;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.ids.remove(&old);
            }
        }
    }
}

/// Active jobs keyed by id, plus the last error per item.
#[derive(Debug, Clone)]
pub struct JobTracker {
    jobs: HashMap<String, Job>,
    finished: FinishedIds,
    failures: HashMap<ItemId, String>,
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTracker {
    pub fn new() -> Self {
        Self::with_memory(FINISHED_MEMORY)
    }

    pub fn with_memory(capacity: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            finished: FinishedIds::new(capacity.max(1)),
            failures: HashMap::new(),
        }
    }

    pub fn get(&self, job_id: &str) -> Option<&Job> {
        self.jobs.get(job_id)
    }

    pub fn active_jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_finished(&self, job_id: &str) -> bool {
        self.finished.contains(job_id)
    }

    /// Kind of the job currently holding `item`, if any.
    pub fn busy_kind(&self, item: ItemId) -> Option<JobKind> {
        self.jobs
            .values()
            .find(|j| j.targets.contains(&item))
            .map(|j| j.kind)
    }

    /// Rejects items that already have a job in flight, of any kind.
    pub fn check_available(&self, items: &BTreeSet<ItemId>) -> Result<(), JobError> {
        for &item_id in items {
            if let Some(kind) = self.busy_kind(item_id) {
                return Err(JobError::ItemBusy { item_id, kind });
            }
        }
        Ok(())
    }

    /// Registers a job this client just requested. It stays provisional
    /// until a `started` echoing `request_id`, or [`confirm`](Self::confirm).
    pub fn begin(
        &mut self,
        kind: JobKind,
        request_id: &str,
        targets: BTreeSet<ItemId>,
    ) -> Result<BTreeSet<ItemId>, JobError> {
        self.check_available(&targets)?;
        for id in &targets {
            self.failures.remove(id);
        }
        debug!(%kind, request_id, targets = targets.len(), "job requested");
        self.jobs.insert(
            request_id.to_owned(),
            Job::requested(kind, request_id, targets.clone()),
        );
        Ok(targets)
    }

    /// Re-keys a provisional job to the server job id returned by the
    /// trigger call. If a push already announced `job_id`, the provisional
    /// entry is merged into it.
    pub fn confirm(&mut self, request_id: &str, job_id: &str) -> BTreeSet<ItemId> {
        if request_id == job_id {
            if let Some(job) = self.jobs.get_mut(job_id) {
                job.provisional = false;
            }
            return BTreeSet::new();
        }
        let Some(mut job) = self.jobs.remove(request_id) else {
            return BTreeSet::new();
        };
        if self.finished.contains(job_id) {
            debug!(request_id, job_id, "job already finished before confirmation");
            return job.targets;
        }
        match self.jobs.get_mut(job_id) {
            Some(existing) => {
                existing.targets.extend(job.targets.iter().copied());
                job.targets
            }
            None => {
                job.id = job_id.to_owned();
                job.provisional = false;
                let touched = job.targets.clone();
                self.jobs.insert(job_id.to_owned(), job);
                touched
            }
        }
    }

    /// Drops a job that will never run (trigger failed). Returns the items
    /// it held.
    pub fn cancel(&mut self, job_id: &str) -> BTreeSet<ItemId> {
        self.jobs
            .remove(job_id)
            .map(|j| j.targets)
            .unwrap_or_default()
    }

    /// Stops tracking delete jobs for `item`; bulk deletes only lose that
    /// member. Returns `true` if anything was dropped.
    pub fn abandon_delete(&mut self, item: ItemId) -> bool {
        let mut changed = false;
        self.jobs.retain(|id, job| {
            if !job.kind.is_delete() || !job.targets.remove(&item) {
                return true;
            }
            changed = true;
            if job.targets.is_empty() {
                info!(job_id = %id, item, "abandoning delete job");
                false
            } else {
                true
            }
        });
        changed
    }

    /// Every item some active job holds.
    pub fn targets(&self) -> BTreeSet<ItemId> {
        self.jobs.values().flat_map(|j| j.targets.iter().copied()).collect()
    }

    /// Forgets items that no longer exist on the server.
    pub fn forget_items(&mut self, items: &BTreeSet<ItemId>) {
        for id in items {
            self.failures.remove(id);
        }
        self.jobs.retain(|_, job| {
            job.targets.retain(|t| !items.contains(t));
            !job.targets.is_empty()
        });
    }

    /// Applies one event announced by the module of `kind`.
    pub fn apply(&mut self, kind: JobKind, event: &JobEvent) -> Applied {
        let job_id = event.job_id();
        if self.finished.contains(job_id) {
            debug!(%kind, job_id, "event for finished job, ignoring");
            return Applied::default();
        }

        match event {
            JobEvent::Started(started) => {
                let targets = event.targets();
                let provisional_key = started
                    .request_id
                    .as_deref()
                    .filter(|r| self.jobs.get(*r).is_some_and(|j| j.provisional));

                let mut job = match provisional_key {
                    Some(request_id) => {
                        let mut job = self.jobs.remove(request_id).unwrap_or_else(|| {
                            Job::requested(kind, request_id, BTreeSet::new())
                        });
                        job.id = job_id.to_owned();
                        job.provisional = false;
                        job
                    }
                    None => self
                        .jobs
                        .remove(job_id)
                        .unwrap_or_else(|| Job::announced(kind, job_id, BTreeSet::new())),
                };
                job.targets.extend(targets);
                if job.status == JobStatus::Queued {
                    job.status = JobStatus::Started;
                }
                for id in &job.targets {
                    self.failures.remove(id);
                }
                info!(%kind, job_id, targets = job.targets.len(), "job started");
                let touched = job.targets.clone();
                self.jobs.insert(job_id.to_owned(), job);
                Applied {
                    touched,
                    effects: Vec::new(),
                }
            }

            JobEvent::StatusUpdated(update) => {
                let targets = event.targets();
                let job = self
                    .jobs
                    .entry(job_id.to_owned())
                    .or_insert_with(|| Job::announced(kind, job_id, BTreeSet::new()));
                job.targets.extend(targets);
                job.record_progress(update);
                Applied {
                    touched: job.targets.clone(),
                    effects: Vec::new(),
                }
            }

            JobEvent::Completed(_) => {
                let targets = self.finish(job_id, event);
                for id in &targets {
                    self.failures.remove(id);
                }
                info!(%kind, job_id, targets = targets.len(), "job completed");
                let mut effects = Vec::new();
                if kind.is_delete() {
                    effects.push(TrackerEffect::Remove(targets.clone()));
                } else {
                    effects.push(TrackerEffect::Refresh);
                }
                Applied {
                    touched: targets,
                    effects,
                }
            }

            JobEvent::Failed(failed) => {
                let targets = self.finish(job_id, event);
                let error = failed.message().to_owned();
                warn!(%kind, job_id, error = %error, "job failed");
                for id in &targets {
                    self.failures.insert(*id, error.clone());
                }
                Applied {
                    touched: targets.clone(),
                    effects: vec![TrackerEffect::Failed { targets, error }],
                }
            }
        }
    }

    /// Removes a job on a terminal event and remembers its id.
    fn finish(&mut self, job_id: &str, event: &JobEvent) -> BTreeSet<ItemId> {
        let mut targets = event.targets();
        if let Some(job) = self.jobs.remove(job_id) {
            targets.extend(job.targets);
        }
        self.finished.insert(job_id.to_owned());
        targets
    }

    /// Derived flags for one item.
    pub fn flags_for(&self, item: ItemId) -> ItemFlags {
        let mut flags = ItemFlags {
            error: self.failures.get(&item).cloned(),
            ..ItemFlags::default()
        };
        for job in self.jobs.values().filter(|j| j.targets.contains(&item)) {
            flags.deleting |= job.kind.is_delete();
            flags.importing |= job.kind.is_import();
            if let Some(p) = job.progress.for_item(item) {
                flags.progress = Some(p);
            }
        }
        flags
    }

    /// Progress of a job, for batch overviews.
    pub fn progress(&self, job_id: &str) -> Option<&Progress> {
        self.jobs.get(job_id).map(|j| &j.progress)
    }
}

#[cfg(test)]
mod tests {
    use geoqueue_protocol::{Frame, ModuleName};

    use super::*;

    fn event(module: ModuleName, json: &str) -> JobEvent {
        let frame: Frame = serde_json::from_str(json).unwrap();
        JobEvent::decode(module, &frame).unwrap()
    }

    fn ids(v: &[ItemId]) -> BTreeSet<ItemId> {
        v.iter().copied().collect()
    }

    #[test]
    fn started_marks_items_and_completed_removes_delete_targets() {
        let mut t = JobTracker::new();
        let started = event(
            ModuleName::BulkDelete,
            r#"{"type":"started","data":{"job_id":"b1","item_ids":[1,2,3]}}"#,
        );
        let applied = t.apply(JobKind::BulkDelete, &started);
        assert_eq!(applied.touched, ids(&[1, 2, 3]));
        for id in [1, 2, 3] {
            assert!(t.flags_for(id).deleting);
        }

        let completed = event(
            ModuleName::BulkDelete,
            r#"{"type":"completed","data":{"job_id":"b1"}}"#,
        );
        let applied = t.apply(JobKind::BulkDelete, &completed);
        assert_eq!(applied.effects, vec![TrackerEffect::Remove(ids(&[1, 2, 3]))]);
        assert!(t.is_empty());
        assert_eq!(t.flags_for(2), ItemFlags::default());
    }

    #[test]
    fn duplicate_completed_is_ignored() {
        let mut t = JobTracker::new();
        let completed = event(
            ModuleName::Delete,
            r#"{"type":"completed","data":{"job_id":"d","item_id":4}}"#,
        );
        let first = t.apply(JobKind::Delete, &completed);
        assert!(!first.is_noop());
        let second = t.apply(JobKind::Delete, &completed);
        assert!(second.is_noop());
        assert!(t.is_finished("d"));
    }

    #[test]
    fn late_progress_after_completion_is_ignored() {
        let mut t = JobTracker::new();
        t.apply(
            JobKind::Upload,
            &event(ModuleName::Upload, r#"{"type":"completed","data":{"job_id":"u","item_id":1}}"#),
        );
        let late = t.apply(
            JobKind::Upload,
            &event(
                ModuleName::Upload,
                r#"{"type":"status_updated","data":{"job_id":"u","item_id":1,"progress":50}}"#,
            ),
        );
        assert!(late.is_noop());
        assert!(!t.flags_for(1).importing);
    }

    #[test]
    fn import_completion_requests_refresh() {
        let mut t = JobTracker::new();
        let applied = t.apply(
            JobKind::Upload,
            &event(ModuleName::Upload, r#"{"type":"completed","data":{"job_id":"u","item_id":1}}"#),
        );
        assert!(applied.needs_refresh());
    }

    #[test]
    fn failure_keeps_error_until_next_job() {
        let mut t = JobTracker::new();
        t.apply(
            JobKind::Upload,
            &event(ModuleName::Upload, r#"{"type":"started","data":{"job_id":"u","item_id":8}}"#),
        );
        t.apply(
            JobKind::Upload,
            &event(
                ModuleName::Upload,
                r#"{"type":"failed","data":{"job_id":"u","item_id":8,"error":"bad geometry"}}"#,
            ),
        );
        let flags = t.flags_for(8);
        assert!(!flags.importing);
        assert_eq!(flags.error.as_deref(), Some("bad geometry"));

        t.begin(JobKind::Upload, "req", ids(&[8])).unwrap();
        assert_eq!(t.flags_for(8).error, None);
    }

    #[test]
    fn started_with_request_id_confirms_provisional_job() {
        let mut t = JobTracker::new();
        t.begin(JobKind::BulkImport, "req-7", ids(&[1, 2])).unwrap();
        assert!(t.get("req-7").unwrap().provisional);
        assert!(t.flags_for(1).importing);

        t.apply(
            JobKind::BulkImport,
            &event(
                ModuleName::BulkImport,
                r#"{"type":"started","data":{"job_id":"srv-1","request_id":"req-7","item_ids":[1,2]}}"#,
            ),
        );
        assert!(t.get("req-7").is_none());
        let job = t.get("srv-1").unwrap();
        assert!(!job.provisional);
        assert_eq!(job.status, JobStatus::Started);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn confirm_merges_into_already_announced_job() {
        let mut t = JobTracker::new();
        t.begin(JobKind::Delete, "req", ids(&[5])).unwrap();
        t.apply(
            JobKind::Delete,
            &event(ModuleName::Delete, r#"{"type":"started","data":{"job_id":"42","item_id":5}}"#),
        );
        assert_eq!(t.len(), 2);

        t.confirm("req", "42");
        assert_eq!(t.len(), 1);
        assert_eq!(t.get("42").unwrap().targets, ids(&[5]));
    }

    #[test]
    fn confirm_rekeys_unannounced_job() {
        let mut t = JobTracker::new();
        t.begin(JobKind::Delete, "req", ids(&[5])).unwrap();
        let touched = t.confirm("req", "99");
        assert_eq!(touched, ids(&[5]));
        let job = t.get("99").unwrap();
        assert_eq!(job.id, "99");
        assert!(!job.provisional);
    }

    #[test]
    fn busy_items_are_rejected() {
        let mut t = JobTracker::new();
        t.begin(JobKind::Upload, "a", ids(&[1])).unwrap();
        let err = t.begin(JobKind::Delete, "b", ids(&[2, 1])).unwrap_err();
        assert!(matches!(
            err,
            JobError::ItemBusy {
                item_id: 1,
                kind: JobKind::Upload
            }
        ));
        assert!(t.get("b").is_none());
    }

    #[test]
    fn abandon_delete_only_drops_that_member() {
        let mut t = JobTracker::new();
        t.begin(JobKind::BulkDelete, "b", ids(&[1, 2])).unwrap();
        t.begin(JobKind::Delete, "d", ids(&[3])).unwrap();

        assert!(t.abandon_delete(1));
        assert_eq!(t.get("b").unwrap().targets, ids(&[2]));
        assert!(t.abandon_delete(3));
        assert!(t.get("d").is_none());
        assert!(!t.abandon_delete(3));
    }

    #[test]
    fn finished_memory_is_bounded() {
        let mut t = JobTracker::with_memory(2);
        for id in ["a", "b", "c"] {
            let json = format!(r#"{{"type":"completed","data":{{"job_id":"{id}","item_id":1}}}}"#);
            t.apply(JobKind::Delete, &event(ModuleName::Delete, &json));
        }
        assert!(!t.is_finished("a"));
        assert!(t.is_finished("b"));
        assert!(t.is_finished("c"));
    }

    #[test]
    fn progress_for_unknown_job_creates_it() {
        let mut t = JobTracker::new();
        t.apply(
            JobKind::BulkImport,
            &event(
                ModuleName::BulkImport,
                r#"{"type":"status_updated","data":{"job_id":"x","item_ids":[1,2],"completed_item_ids":[1],"current_item_id":2}}"#,
            ),
        );
        assert!(t.flags_for(2).importing);
        assert_eq!(t.flags_for(1).progress, Some(100.0));
        assert_eq!(t.progress("x").and_then(|p| p.percent()), Some(50.0));
    }
}
