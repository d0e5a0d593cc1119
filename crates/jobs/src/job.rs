//! A single tracked job and its progress model.

use std::collections::BTreeSet;

use serde::Serialize;

use geoqueue_protocol::{ItemId, JobKind, JobProgress, JobStatus};

/// Last known progress of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Progress {
    #[default]
    None,
    /// Single-item job, `0..=100`.
    Percent { value: f64 },
    /// Bulk job. Members finish in any order.
    Batch {
        done: BTreeSet<ItemId>,
        current: Option<ItemId>,
        total: usize,
    },
}

impl Progress {
    /// Progress shown on one member item.
    pub fn for_item(&self, id: ItemId) -> Option<f64> {
        match self {
            Progress::None => None,
            Progress::Percent { value } => Some(*value),
            Progress::Batch { done, .. } => done.contains(&id).then_some(100.0),
        }
    }

    /// Overall completion in `0..=100`.
    pub fn percent(&self) -> Option<f64> {
        match self {
            Progress::None => None,
            Progress::Percent { value } => Some(*value),
            Progress::Batch { done, total, .. } if *total > 0 => {
                Some(done.len() as f64 * 100.0 / *total as f64)
            }
            Progress::Batch { .. } => None,
        }
    }
}

/// A job the client knows about.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    /// Server job id, or the client request id while `provisional`.
    pub id: String,
    pub kind: JobKind,
    pub targets: BTreeSet<ItemId>,
    pub status: JobStatus,
    pub progress: Progress,
    /// Requested by this client and not yet confirmed by the server.
    pub provisional: bool,
}

impl Job {
    /// Job requested by this client, keyed by its request id.
    pub fn requested(kind: JobKind, request_id: impl Into<String>, targets: BTreeSet<ItemId>) -> Self {
        Self {
            id: request_id.into(),
            kind,
            targets,
            status: JobStatus::Queued,
            progress: Progress::None,
            provisional: true,
        }
    }

    /// Job first seen through a server push.
    pub fn announced(kind: JobKind, job_id: impl Into<String>, targets: BTreeSet<ItemId>) -> Self {
        Self {
            status: JobStatus::Started,
            provisional: false,
            ..Self::requested(kind, job_id, targets)
        }
    }

    /// Folds a `status_updated` payload into the job.
    pub fn record_progress(&mut self, update: &JobProgress) {
        self.status = JobStatus::InProgress;
        if let Some(msg) = &update.message {
            tracing::trace!(job_id = %self.id, "{msg}");
        }

        if self.kind.is_bulk() {
            let (mut done, mut current) = match std::mem::take(&mut self.progress) {
                Progress::Batch { done, current, .. } => (done, current),
                _ => (BTreeSet::new(), None),
            };
            done.extend(update.completed_item_ids.iter().copied());
            if update.current_item_id.is_some() {
                current = update.current_item_id;
            }
            if current.is_some_and(|c| done.contains(&c)) {
                current = None;
            }
            let total = update
                .total
                .map(|t| t as usize)
                .unwrap_or(0)
                .max(self.targets.len());
            self.progress = Progress::Batch {
                done,
                current,
                total,
            };
            return;
        }

        let value = match (update.progress, update.processed, update.total) {
            (Some(p), _, _) => Some(p),
            (None, Some(done), Some(total)) if total > 0 => {
                Some(f64::from(done) * 100.0 / f64::from(total))
            }
            _ => None,
        };
        if let Some(value) = value {
            self.progress = Progress::Percent {
                value: value.clamp(0.0, 100.0),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(json: &str) -> JobProgress {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn single_item_progress_uses_percentage_or_ratio() {
        let mut job = Job::announced(JobKind::Upload, "j", BTreeSet::from([1]));
        job.record_progress(&progress(r#"{"job_id":"j","progress":40.0}"#));
        assert_eq!(job.progress.for_item(1), Some(40.0));
        assert_eq!(job.status, JobStatus::InProgress);

        job.record_progress(&progress(r#"{"job_id":"j","processed":3,"total":4}"#));
        assert_eq!(job.progress.percent(), Some(75.0));

        // An update without numbers keeps the last value.
        job.record_progress(&progress(r#"{"job_id":"j","message":"parsing"}"#));
        assert_eq!(job.progress.percent(), Some(75.0));
    }

    #[test]
    fn batch_progress_accumulates_out_of_order() {
        let mut job = Job::announced(JobKind::BulkImport, "b", BTreeSet::from([1, 2, 3]));
        job.record_progress(&progress(
            r#"{"job_id":"b","current_item_id":2,"completed_item_ids":[3]}"#,
        ));
        job.record_progress(&progress(
            r#"{"job_id":"b","current_item_id":1,"completed_item_ids":[2]}"#,
        ));

        match &job.progress {
            Progress::Batch {
                done,
                current,
                total,
            } => {
                assert_eq!(done, &BTreeSet::from([2, 3]));
                assert_eq!(*current, Some(1));
                assert_eq!(*total, 3);
            }
            other => panic!("expected batch progress, got {other:?}"),
        }
        assert_eq!(job.progress.for_item(3), Some(100.0));
        assert_eq!(job.progress.for_item(1), None);
    }

    #[test]
    fn requested_jobs_start_queued() {
        let job = Job::requested(JobKind::Delete, "req-1", BTreeSet::from([9]));
        assert!(job.provisional);
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress.percent(), None);
    }
}
