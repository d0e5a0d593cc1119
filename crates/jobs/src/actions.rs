//! User-initiated queue actions.
//!
//! Every action enforces the busy rule first, registers a provisional job,
//! and only then reaches out to the backend or the channel. If the trigger
//! fails the provisional job is dropped again.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use geoqueue_protocol::constants::{TRIGGER_START_BULK_DELETE, TRIGGER_START_BULK_IMPORT};
use geoqueue_protocol::{
    BulkDeleteTrigger, BulkImportTrigger, Frame, ItemId, JobKind, ModuleName,
};
use geoqueue_realtime::FrameSender;

use crate::backend::{JobBackend, JobRequest, JobTicket};
use crate::error::JobError;
use crate::reconciler::ReconcileOutcome;
use crate::state::{SharedState, lock};

/// Entry point for actions on the queue.
#[derive(Clone)]
pub struct QueueActions {
    state: SharedState,
    backend: Arc<dyn JobBackend>,
    sender: FrameSender,
}

impl std::fmt::Debug for QueueActions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueActions")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

impl QueueActions {
    pub fn new(state: SharedState, backend: Arc<dyn JobBackend>, sender: FrameSender) -> Self {
        Self {
            state,
            backend,
            sender,
        }
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Deletes one item through the backend.
    pub async fn delete_item(&self, item_id: ItemId) -> Result<JobTicket, JobError> {
        let request_id = new_request_id();
        self.enqueue(JobRequest::Delete {
            item_id,
            request_id,
        })
        .await
    }

    /// Imports one item through the backend.
    pub async fn import_item(
        &self,
        item_id: ItemId,
        options: serde_json::Value,
    ) -> Result<JobTicket, JobError> {
        let request_id = new_request_id();
        self.enqueue(JobRequest::Import {
            item_id,
            request_id,
            options,
        })
        .await
    }

    async fn enqueue(&self, request: JobRequest) -> Result<JobTicket, JobError> {
        let kind = request.kind();
        let request_id = request.request_id().to_owned();
        lock(&self.state)?.begin_job(kind, &request_id, BTreeSet::from([request.item_id()]))?;

        match self.backend.enqueue(request).await {
            Ok(ticket) => {
                info!(%kind, %request_id, job_id = %ticket.job_id, "job enqueued");
                lock(&self.state)?.confirm_job(&request_id, &ticket.job_id);
                Ok(ticket)
            }
            Err(e) => {
                warn!(%kind, %request_id, error = %e, "enqueue failed");
                lock(&self.state)?.cancel_job(&request_id);
                Err(e)
            }
        }
    }

    /// Validates a bulk selection: every item must exist and be idle.
    pub fn select_for_bulk(
        &self,
        items: impl IntoIterator<Item = ItemId>,
    ) -> Result<BTreeSet<ItemId>, JobError> {
        let selection: BTreeSet<ItemId> = items.into_iter().collect();
        lock(&self.state)?.check_actionable(&selection)?;
        Ok(selection)
    }

    /// Triggers a bulk import over the channel. Returns the request id the
    /// server will echo in `started`.
    pub fn bulk_import(
        &self,
        items: impl IntoIterator<Item = ItemId>,
        options: serde_json::Value,
    ) -> Result<String, JobError> {
        let item_ids: BTreeSet<ItemId> = items.into_iter().collect();
        let request_id = new_request_id();
        let trigger = BulkImportTrigger {
            request_id: request_id.clone(),
            item_ids: item_ids.iter().copied().collect(),
            options,
        };
        let frame = Frame::for_module(
            ModuleName::BulkImport,
            TRIGGER_START_BULK_IMPORT,
            Some(&trigger),
        )?;
        self.trigger(JobKind::BulkImport, request_id, item_ids, &frame)
    }

    /// Triggers a bulk delete over the channel.
    pub fn bulk_delete(&self, items: impl IntoIterator<Item = ItemId>) -> Result<String, JobError> {
        let item_ids: BTreeSet<ItemId> = items.into_iter().collect();
        let request_id = new_request_id();
        let trigger = BulkDeleteTrigger {
            request_id: request_id.clone(),
            item_ids: item_ids.iter().copied().collect(),
        };
        let frame = Frame::for_module(
            ModuleName::BulkDelete,
            TRIGGER_START_BULK_DELETE,
            Some(&trigger),
        )?;
        self.trigger(JobKind::BulkDelete, request_id, item_ids, &frame)
    }

    fn trigger(
        &self,
        kind: JobKind,
        request_id: String,
        item_ids: BTreeSet<ItemId>,
        frame: &Frame,
    ) -> Result<String, JobError> {
        let count = item_ids.len();
        let mut state = lock(&self.state)?;
        state.begin_job(kind, &request_id, item_ids)?;
        if let Err(e) = self.sender.send(frame) {
            warn!(%kind, %request_id, error = %e, "bulk trigger not sent");
            state.cancel_job(&request_id);
            return Err(e.into());
        }
        info!(%kind, %request_id, items = count, "bulk job requested");
        Ok(request_id)
    }

    /// Fetches the authoritative collection and reconciles pending deletes
    /// against it.
    pub async fn refresh(&self) -> Result<ReconcileOutcome, JobError> {
        let items = self.backend.fetch_items().await?;
        debug!(items = items.len(), "fetched queue snapshot");
        Ok(lock(&self.state)?.apply_snapshot(items))
    }
}

fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use geoqueue_protocol::ItemRecord;
    use geoqueue_realtime::WsMessage;
    use tokio::sync::mpsc;

    use super::*;
    use crate::backend::BackendFuture;
    use crate::queue::QueueStore;
    use crate::reconciler::ReconcileConfig;
    use crate::state::SyncState;

    #[derive(Default)]
    pub(crate) struct FakeBackend {
        pub items: Mutex<Vec<ItemRecord>>,
        pub requests: Mutex<Vec<JobRequest>>,
        pub fail: AtomicBool,
        pub fetches: AtomicUsize,
    }

    impl FakeBackend {
        pub fn with_items(ids: &[ItemId]) -> Arc<Self> {
            let backend = Self::default();
            *backend.items.lock().unwrap() = ids
                .iter()
                .map(|&id| ItemRecord::new(id, format!("upload-{id}.csv")))
                .collect();
            Arc::new(backend)
        }
    }

    impl JobBackend for FakeBackend {
        fn enqueue(&self, request: JobRequest) -> BackendFuture<'_, JobTicket> {
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(JobError::Backend("503 Service Unavailable".into()));
                }
                let mut requests = self.requests.lock().unwrap();
                requests.push(request);
                Ok(JobTicket {
                    job_id: format!("job-{}", requests.len()),
                })
            })
        }

        fn fetch_items(&self) -> BackendFuture<'_, Vec<ItemRecord>> {
            Box::pin(async move {
                self.fetches.fetch_add(1, Ordering::SeqCst);
                if self.fail.load(Ordering::SeqCst) {
                    return Err(JobError::Backend("connection refused".into()));
                }
                Ok(self.items.lock().unwrap().clone())
            })
        }
    }

    async fn setup(
        ids: &[ItemId],
    ) -> (QueueActions, Arc<FakeBackend>, mpsc::Receiver<WsMessage>) {
        let backend = FakeBackend::with_items(ids);
        let (tx, rx) = mpsc::channel(16);
        let actions = QueueActions::new(
            SyncState::shared(ReconcileConfig::default()),
            backend.clone(),
            FrameSender::attached(tx),
        );
        actions.refresh().await.unwrap();
        (actions, backend, rx)
    }

    #[tokio::test]
    async fn delete_item_marks_deleting_and_rekeys_job() {
        let (actions, backend, _rx) = setup(&[1, 2]).await;

        let ticket = actions.delete_item(1).await.unwrap();
        assert_eq!(ticket.job_id, "job-1");

        let state = actions.state().lock().unwrap();
        assert!(state.queue().get(1).unwrap().flags.deleting);
        assert!(state.tracker().get("job-1").is_some());
        assert!(state.reconciler().is_pending(1));
        assert_eq!(backend.requests.lock().unwrap()[0].item_id(), 1);
    }

    #[tokio::test]
    async fn failed_enqueue_releases_item() {
        let (actions, backend, _rx) = setup(&[1]).await;
        backend.fail.store(true, Ordering::SeqCst);

        let err = actions.delete_item(1).await.unwrap_err();
        assert!(matches!(err, JobError::Backend(_)));

        let state = actions.state().lock().unwrap();
        assert!(!state.queue().get(1).unwrap().flags.deleting);
        assert!(state.tracker().is_empty());
        assert!(!state.reconciler().is_pending(1));
    }

    #[tokio::test]
    async fn busy_item_rejects_every_action() {
        let (actions, backend, _rx) = setup(&[1, 2]).await;
        actions.import_item(1, serde_json::json!({})).await.unwrap();

        assert!(matches!(
            actions.delete_item(1).await,
            Err(JobError::ItemBusy { item_id: 1, kind: JobKind::Upload })
        ));
        assert!(matches!(
            actions.select_for_bulk([1, 2]),
            Err(JobError::ItemBusy { item_id: 1, .. })
        ));
        assert!(actions.bulk_delete([1]).is_err());
        assert_eq!(backend.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bulk_delete_sends_trigger_frame() {
        let (actions, _backend, mut rx) = setup(&[1, 2, 3]).await;

        let request_id = actions.bulk_delete([3, 1, 2]).unwrap();

        let Ok(WsMessage::Text(text)) = rx.try_recv() else {
            panic!("expected a trigger frame");
        };
        let frame: Frame = serde_json::from_str(text.as_str()).unwrap();
        assert_eq!(frame.module.as_deref(), Some("bulk_delete"));
        assert_eq!(frame.frame_type, "start_bulk_delete");
        let trigger: BulkDeleteTrigger = frame.require_data().unwrap();
        assert_eq!(trigger.request_id, request_id);
        assert_eq!(trigger.item_ids, vec![1, 2, 3]);

        let state = actions.state().lock().unwrap();
        assert!((1..=3).all(|id| state.queue().get(id).unwrap().flags.deleting));
    }

    #[tokio::test]
    async fn bulk_trigger_without_channel_is_rolled_back() {
        let backend = FakeBackend::with_items(&[1, 2]);
        let actions = QueueActions::new(
            SyncState::shared(ReconcileConfig::default()),
            backend,
            FrameSender::detached(),
        );
        actions.refresh().await.unwrap();

        let err = actions.bulk_import([1, 2], serde_json::json!({})).unwrap_err();
        assert!(matches!(err, JobError::Realtime(_)));
        assert!(actions.state().lock().unwrap().tracker().is_empty());
    }

    #[tokio::test]
    async fn empty_or_unknown_selection_is_rejected() {
        let (actions, _backend, _rx) = setup(&[1]).await;
        assert!(matches!(actions.bulk_delete(Vec::<ItemId>::new()), Err(JobError::EmptySelection)));
        assert!(matches!(
            actions.select_for_bulk([1, 9]),
            Err(JobError::UnknownItem(9))
        ));
    }

    #[tokio::test]
    async fn refresh_restores_stuck_delete_on_third_cycle() {
        let (actions, backend, _rx) = setup(&[42]).await;
        actions.delete_item(42).await.unwrap();

        for _ in 0..2 {
            assert!(actions.refresh().await.unwrap().is_empty());
        }
        let outcome = actions.refresh().await.unwrap();
        assert_eq!(outcome.restored, BTreeSet::from([42]));
        assert!(!actions.state().lock().unwrap().queue().get(42).unwrap().flags.deleting);

        // Once gone on the server, a new delete confirms on the next refresh.
        actions.delete_item(42).await.unwrap();
        backend.items.lock().unwrap().clear();
        let outcome = actions.refresh().await.unwrap();
        assert_eq!(outcome.confirmed, BTreeSet::from([42]));
    }
}
