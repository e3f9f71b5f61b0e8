use super::connectivity_monitor::ConnectivityHandle;
use super::reconciliation_service::write_record;
use crate::application::ports::{MutationQueue, RemoteError, RemoteRecordStore};
use crate::domain::assignment::{AssignmentModel, AssignmentUnit, SharedAssignmentModel};
use crate::domain::entities::{MutationDraft, MutationRecord};
use crate::domain::value_objects::{FieldMap, OwnerId, RecordId, UnitId};
use crate::infrastructure::offline::{MirrorCache, SyncMetrics, WriteOutcomeStatus};
use crate::shared::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// How the background remote write of one mutation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written and dequeued.
    Confirmed,
    /// A newer edit (or a drain) took over the queue entry; nothing was dequeued.
    Superseded,
    /// Not attempted while offline; the next drain sends it.
    Deferred,
    /// The write failed; the entry stays queued.
    Retained(RemoteError),
}

/// Background remote write started by the dispatcher.
///
/// Dropping it does not cancel the write.
#[derive(Debug)]
pub struct PendingWrite {
    handle: Option<JoinHandle<WriteOutcome>>,
}

impl PendingWrite {
    fn deferred() -> Self {
        Self { handle: None }
    }

    pub async fn outcome(self) -> WriteOutcome {
        match self.handle {
            Some(handle) => handle.await.unwrap_or_else(|err| {
                WriteOutcome::Retained(RemoteError::Ambiguous(err.to_string()))
            }),
            None => WriteOutcome::Deferred,
        }
    }
}

/// Result of one optimistic edit.
#[derive(Debug)]
pub struct AppliedMutation {
    /// Model state right after the edit.
    pub unit: AssignmentUnit,
    /// The queued intent carrying `unit`'s full field set.
    pub record: MutationRecord,
    pub write: PendingWrite,
}

/// Applies edits to the model at once and syncs them in the background.
///
/// Edits are serialized from the model change until the queue `put` returns,
/// so queue versions follow the order in which the model saw the edits.
pub struct MutationDispatcher {
    model: SharedAssignmentModel,
    queue: Arc<dyn MutationQueue>,
    mirror: Option<Arc<MirrorCache>>,
    remote: Arc<dyn RemoteRecordStore>,
    connectivity: ConnectivityHandle,
    metrics: Arc<SyncMetrics>,
    write_timeout: Duration,
    edit_gate: Mutex<()>,
}

impl MutationDispatcher {
    pub fn new(
        model: SharedAssignmentModel,
        queue: Arc<dyn MutationQueue>,
        mirror: Option<Arc<MirrorCache>>,
        remote: Arc<dyn RemoteRecordStore>,
        connectivity: ConnectivityHandle,
        metrics: Arc<SyncMetrics>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            model,
            queue,
            mirror,
            remote,
            connectivity,
            metrics,
            write_timeout,
            edit_gate: Mutex::new(()),
        }
    }

    pub fn model(&self) -> &SharedAssignmentModel {
        &self.model
    }

    pub async fn apply(
        &self,
        unit_id: &UnitId,
        changes: &FieldMap,
    ) -> Result<AppliedMutation, AppError> {
        self.dispatch(|model| model.apply_changes(unit_id, changes)).await
    }

    pub async fn assign(
        &self,
        unit_id: &UnitId,
        owner_id: &OwnerId,
    ) -> Result<AppliedMutation, AppError> {
        self.dispatch(|model| model.assign(unit_id, owner_id)).await
    }

    pub async fn unassign(&self, unit_id: &UnitId) -> Result<AppliedMutation, AppError> {
        self.dispatch(|model| model.unassign(unit_id)).await
    }

    /// Whether `record_id` still has an unconfirmed write.
    pub async fn is_dirty(&self, record_id: &RecordId) -> Result<bool, AppError> {
        if self.queue.get(record_id).await?.is_some() {
            return Ok(true);
        }
        Ok(match &self.mirror {
            Some(mirror) => mirror.contains(record_id).await,
            None => false,
        })
    }

    /// Re-applies queued intents onto a freshly seeded model after a restart.
    ///
    /// Mirror-only documents are applied too. Intents for units the model does
    /// not know are skipped. Returns the number of units restored.
    pub async fn restore_pending(&self) -> Result<usize, AppError> {
        let _edit = self.edit_gate.lock().await;
        let mut pending = self.queue.get_all().await?;
        if let Some(mirror) = &self.mirror {
            for doc in mirror.get_cached_docs().await {
                if !pending.iter().any(|record| record.record_id == doc.record_id) {
                    pending.push(doc);
                }
            }
        }

        let mut model = self
            .model
            .write()
            .map_err(|_| AppError::Internal("assignment model lock poisoned".into()))?;
        let mut restored = 0;
        for record in pending {
            let unit_id = UnitId::new(record.record_id.to_string()).map_err(AppError::Internal)?;
            if model.unit(&unit_id).is_none() {
                tracing::warn!(
                    target: "sync::dispatch",
                    record_id = %record.record_id,
                    "queued intent for unknown unit, skipped"
                );
                continue;
            }
            match model.apply_changes(&unit_id, &record.fields) {
                Ok(_) => restored += 1,
                Err(err) => tracing::warn!(
                    target: "sync::dispatch",
                    record_id = %record.record_id,
                    error = %err,
                    "queued intent could not be restored"
                ),
            }
        }
        tracing::info!(target: "sync::dispatch", restored, "pending intents restored");
        Ok(restored)
    }

    async fn dispatch<F>(&self, change: F) -> Result<AppliedMutation, AppError>
    where
        F: FnOnce(&mut AssignmentModel) -> Result<AssignmentUnit, AppError>,
    {
        // モデル更新からputまでを一つの編集として直列化する
        let _edit = self.edit_gate.lock().await;
        let unit = self.mutate(change)?;
        self.enqueue(unit).await
    }

    fn mutate<F>(&self, change: F) -> Result<AssignmentUnit, AppError>
    where
        F: FnOnce(&mut AssignmentModel) -> Result<AssignmentUnit, AppError>,
    {
        let mut model = self
            .model
            .write()
            .map_err(|_| AppError::Internal("assignment model lock poisoned".into()))?;
        change(&mut model)
    }

    async fn enqueue(&self, unit: AssignmentUnit) -> Result<AppliedMutation, AppError> {
        let online = self.connectivity.is_online();
        let draft =
            MutationDraft::new(unit.id.record_id(), unit.to_fields()).with_offline_origin(!online);

        // キューに書けなければミラーへ退避する
        let record = match self.queue.put(draft.clone()).await {
            Ok(record) => record,
            Err(err) => {
                self.fall_back_to_mirror(draft, &err).await;
                return Err(err);
            }
        };

        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.cache_doc(record.clone()).await {
                tracing::warn!(
                    target: "sync::mirror",
                    record_id = %record.record_id,
                    error = %err,
                    "failed to mirror queued mutation"
                );
            }
        }

        // オフライン中は送らず次のドレインに任せる
        let write = if online {
            self.spawn_write(record.clone())
        } else {
            tracing::debug!(
                target: "sync::dispatch",
                record_id = %record.record_id,
                version = record.version,
                "offline, write deferred to next drain"
            );
            PendingWrite::deferred()
        };

        Ok(AppliedMutation {
            unit,
            record,
            write,
        })
    }

    async fn fall_back_to_mirror(&self, draft: MutationDraft, err: &AppError) {
        tracing::error!(
            target: "sync::dispatch",
            record_id = %draft.record_id,
            error = %err,
            "durable queue write failed"
        );
        let Some(mirror) = &self.mirror else {
            return;
        };
        let record_id = draft.record_id.clone();
        if let Err(mirror_err) = mirror.cache_doc(MutationRecord::unversioned(draft)).await {
            tracing::error!(
                target: "sync::mirror",
                record_id = %record_id,
                error = %mirror_err,
                "mirror fallback failed, edit exists only in memory"
            );
        }
    }

    fn spawn_write(&self, record: MutationRecord) -> PendingWrite {
        let queue = Arc::clone(&self.queue);
        let mirror = self.mirror.clone();
        let remote = Arc::clone(&self.remote);
        let metrics = Arc::clone(&self.metrics);
        let timeout = self.write_timeout;

        let handle = tokio::spawn(async move {
            send_and_confirm(
                queue.as_ref(),
                mirror.as_deref(),
                remote.as_ref(),
                &metrics,
                timeout,
                record,
            )
            .await
        });
        PendingWrite {
            handle: Some(handle),
        }
    }
}

async fn send_and_confirm(
    queue: &dyn MutationQueue,
    mirror: Option<&MirrorCache>,
    remote: &dyn RemoteRecordStore,
    metrics: &SyncMetrics,
    timeout: Duration,
    record: MutationRecord,
) -> WriteOutcome {
    // 送信前に最新の版か確認する
    match queue.get(&record.record_id).await {
        Ok(Some(current)) if record.is_superseded_by(&current) => {
            tracing::debug!(
                target: "sync::dispatch",
                record_id = %record.record_id,
                version = record.version,
                current = current.version,
                "superseded before sending"
            );
            return WriteOutcome::Superseded;
        }
        // ドレインが先に送信済み
        Ok(None) => return WriteOutcome::Superseded,
        Ok(Some(_)) => {}
        Err(err) => tracing::warn!(
            target: "sync::dispatch",
            record_id = %record.record_id,
            error = %err,
            "queue re-check failed, sending anyway"
        ),
    }

    if let Err(err) = write_record(remote, &record, timeout).await {
        metrics.record_write(WriteOutcomeStatus::Failure);
        tracing::warn!(
            target: "sync::dispatch",
            record_id = %record.record_id,
            version = record.version,
            kind = err.kind(),
            error = %err,
            "remote write failed, record stays queued"
        );
        return WriteOutcome::Retained(err);
    }
    metrics.record_write(WriteOutcomeStatus::Success);

    let outcome = match queue
        .remove_if_current(&record.record_id, record.version)
        .await
    {
        Ok(true) => WriteOutcome::Confirmed,
        // 書き込み中に新しい編集が入った
        Ok(false) => WriteOutcome::Superseded,
        Err(err) => {
            tracing::warn!(
                target: "sync::dispatch",
                record_id = %record.record_id,
                error = %err,
                "written but not dequeued, it will be resent"
            );
            WriteOutcome::Confirmed
        }
    };

    if let Some(mirror) = mirror {
        if let Err(err) = mirror.remove_cached_doc_if_matches(&record).await {
            tracing::warn!(
                target: "sync::mirror",
                record_id = %record.record_id,
                error = %err,
                "failed to drop synced mirror document"
            );
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::{ConnectivityMonitor, ReconciliationService};
    use crate::domain::assignment::{OwnerUnit, LOADS_FIELD};
    use crate::domain::entities::Connectivity;
    use crate::domain::value_objects::{field_map, FieldValue};
    use crate::infrastructure::notify::TracingNotifier;
    use crate::infrastructure::offline::SqliteMutationQueue;
    use crate::infrastructure::remote::InMemoryRecordStore;
    use tempfile::TempDir;

    struct Harness {
        monitor: ConnectivityMonitor,
        queue: Arc<SqliteMutationQueue>,
        mirror: Arc<MirrorCache>,
        remote: Arc<InMemoryRecordStore>,
        dispatcher: MutationDispatcher,
        reconciler: ReconciliationService,
    }

    fn unit_id(raw: &str) -> UnitId {
        UnitId::new(raw.to_string()).unwrap()
    }

    fn owner_id(raw: &str) -> OwnerId {
        OwnerId::new(raw.to_string()).unwrap()
    }

    fn seeded_model() -> AssignmentModel {
        let mut model = AssignmentModel::new();
        model.register_owner(OwnerUnit::new(owner_id("EX01")).with_work_area("North Pit"));
        model
            .insert_unit(AssignmentUnit::new(unit_id("R1")).with_attribute("material", "Coal"))
            .unwrap();
        model
            .insert_unit(AssignmentUnit::new(unit_id("T1")).with_attribute("material", "Coal"))
            .unwrap();
        model
    }

    fn harness(initial: Connectivity, queue: SqliteMutationQueue) -> Harness {
        let monitor = ConnectivityMonitor::new(initial);
        let queue = Arc::new(queue);
        let mirror = Arc::new(MirrorCache::in_memory());
        let remote = Arc::new(InMemoryRecordStore::new());
        let metrics = Arc::new(SyncMetrics::new());
        let dispatcher = MutationDispatcher::new(
            seeded_model().into_shared(),
            queue.clone(),
            Some(mirror.clone()),
            remote.clone(),
            monitor.handle(),
            metrics.clone(),
            Duration::from_secs(5),
        );
        let reconciler = ReconciliationService::new(
            queue.clone(),
            Some(mirror.clone()),
            remote.clone(),
            Arc::new(TracingNotifier),
            metrics,
            Duration::from_secs(5),
        );
        Harness {
            monitor,
            queue,
            mirror,
            remote,
            dispatcher,
            reconciler,
        }
    }

    fn loads(value: i64) -> FieldMap {
        field_map([(LOADS_FIELD, value)])
    }

    #[tokio::test]
    async fn test_offline_edits_collapse_to_latest() {
        let h = harness(Connectivity::Offline, SqliteMutationQueue::in_memory());
        let r1 = unit_id("R1");

        let first = h.dispatcher.apply(&r1, &loads(5)).await.unwrap();
        assert_eq!(first.write.outcome().await, WriteOutcome::Deferred);
        let second = h.dispatcher.apply(&r1, &loads(9)).await.unwrap();
        assert!(second.record.offline_origin);
        assert_eq!(second.unit.loads, 9);

        let queued = h.queue.get_all().await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].fields[LOADS_FIELD], FieldValue::Integer(9));

        h.monitor.set_online();
        let outcome = h.reconciler.drain().await.unwrap();
        assert_eq!(outcome.report().unwrap().succeeded, 1);

        let remote = h.remote.record(&r1.record_id()).await.unwrap();
        assert_eq!(remote[LOADS_FIELD], FieldValue::Integer(9));
        assert!(h
            .remote
            .writes()
            .await
            .iter()
            .all(|(_, fields)| fields[LOADS_FIELD] != FieldValue::Integer(5)));
        assert_eq!(h.queue.len().await.unwrap(), 0);
        assert!(h.mirror.is_empty().await);
    }

    #[tokio::test]
    async fn test_online_write_confirms_and_dequeues() {
        let h = harness(Connectivity::Online, SqliteMutationQueue::in_memory());

        let applied = h
            .dispatcher
            .assign(&unit_id("T1"), &owner_id("EX01"))
            .await
            .unwrap();
        assert_eq!(applied.unit.owner_id, Some(owner_id("EX01")));
        assert!(!applied.record.offline_origin);
        assert_eq!(applied.write.outcome().await, WriteOutcome::Confirmed);

        assert!(!h.dispatcher.is_dirty(&unit_id("T1").record_id()).await.unwrap());
        let remote = h.remote.record(&unit_id("T1").record_id()).await.unwrap();
        assert_eq!(remote["material"], FieldValue::from("Coal"));
        assert_eq!(remote["owner_id"], FieldValue::from("EX01"));
    }

    #[tokio::test]
    async fn test_stale_write_does_not_clear_newer_entry() {
        let h = harness(Connectivity::Online, SqliteMutationQueue::in_memory());
        h.remote
            .set_write_delay(Some(Duration::from_millis(50)))
            .await;
        let r1 = unit_id("R1");

        let first = h.dispatcher.apply(&r1, &loads(5)).await.unwrap();
        h.remote.set_available(false);
        let second = h.dispatcher.apply(&r1, &loads(9)).await.unwrap();

        let first = first.write.outcome().await;
        assert!(matches!(
            first,
            WriteOutcome::Superseded | WriteOutcome::Retained(_)
        ));
        assert!(matches!(
            second.write.outcome().await,
            WriteOutcome::Retained(_)
        ));

        let queued = h.queue.get(&r1.record_id()).await.unwrap().unwrap();
        assert_eq!(queued.version, second.record.version);
        assert!(h.dispatcher.is_dirty(&r1.record_id()).await.unwrap());

        h.remote.set_available(true);
        h.reconciler.drain().await.unwrap();
        let remote = h.remote.record(&r1.record_id()).await.unwrap();
        assert_eq!(remote[LOADS_FIELD], FieldValue::Integer(9));
        assert!(!h.dispatcher.is_dirty(&r1.record_id()).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_edits_queue_the_model_state() {
        let temp_dir = TempDir::new().unwrap();
        let queue = Arc::new(SqliteMutationQueue::new(
            temp_dir.path().join("mutation-queue-v1.db"),
            4,
        ));
        let monitor = ConnectivityMonitor::new(Connectivity::Offline);
        let dispatcher = Arc::new(MutationDispatcher::new(
            seeded_model().into_shared(),
            queue.clone(),
            None,
            Arc::new(InMemoryRecordStore::new()),
            monitor.handle(),
            Arc::new(SyncMetrics::new()),
            Duration::from_secs(5),
        ));
        let r1 = unit_id("R1");

        for round in 0..100_i64 {
            let tasks: Vec<_> = [round * 2, round * 2 + 1]
                .into_iter()
                .map(|value| {
                    let dispatcher = dispatcher.clone();
                    let r1 = r1.clone();
                    tokio::spawn(async move { dispatcher.apply(&r1, &loads(value)).await })
                })
                .collect();
            for task in tasks {
                task.await.unwrap().unwrap();
            }

            let model_loads = dispatcher.model().read().unwrap().unit(&r1).unwrap().loads;
            let queued = queue.get(&r1.record_id()).await.unwrap().unwrap();
            assert_eq!(
                queued.fields[LOADS_FIELD],
                FieldValue::from(model_loads),
                "round {round}"
            );
        }
    }

    #[tokio::test]
    async fn test_superseded_write_is_not_sent() {
        let h = harness(Connectivity::Offline, SqliteMutationQueue::in_memory());
        let r1 = unit_id("R1");
        let stale = h.dispatcher.apply(&r1, &loads(5)).await.unwrap().record;
        let fresh = h.dispatcher.apply(&r1, &loads(9)).await.unwrap().record;

        let metrics = SyncMetrics::new();
        let outcome = send_and_confirm(
            h.queue.as_ref(),
            Some(h.mirror.as_ref()),
            h.remote.as_ref(),
            &metrics,
            Duration::from_secs(5),
            stale,
        )
        .await;
        assert_eq!(outcome, WriteOutcome::Superseded);
        assert_eq!(h.remote.write_count().await, 0);
        assert_eq!(h.queue.get(&r1.record_id()).await.unwrap(), Some(fresh));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_entry_queued() {
        let h = harness(Connectivity::Online, SqliteMutationQueue::in_memory());
        h.remote.reject(unit_id("R1").record_id()).await;

        let applied = h.dispatcher.apply(&unit_id("R1"), &loads(2)).await.unwrap();
        assert!(matches!(
            applied.write.outcome().await,
            WriteOutcome::Retained(RemoteError::Rejected(_))
        ));
        assert_eq!(h.queue.len().await.unwrap(), 1);
        assert_eq!(h.dispatcher.model().read().unwrap().unit(&unit_id("R1")).unwrap().loads, 2);
    }

    #[tokio::test]
    async fn test_storage_failure_falls_back_to_mirror() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let h = harness(
            Connectivity::Online,
            SqliteMutationQueue::new(blocker.join("queue.db"), 1),
        );

        let err = h
            .dispatcher
            .apply(&unit_id("R1"), &loads(4))
            .await
            .unwrap_err();
        assert!(err.is_storage_unavailable());

        let model = h.dispatcher.model().read().unwrap();
        assert_eq!(model.unit(&unit_id("R1")).unwrap().loads, 4);
        drop(model);
        let docs = h.mirror.get_cached_docs().await;
        assert_eq!(docs.len(), 1);
        assert!(!docs[0].is_versioned());
        assert_eq!(h.remote.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_model_error_leaves_queue_untouched() {
        let h = harness(Connectivity::Online, SqliteMutationQueue::in_memory());
        let err = h
            .dispatcher
            .assign(&unit_id("T1"), &owner_id("EX99"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::OwnerNotFound(_)));
        assert_eq!(h.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_restore_pending_overlays_queued_state() {
        let queue = Arc::new(SqliteMutationQueue::in_memory());
        let mut unit = seeded_model().unit(&unit_id("T1")).cloned().unwrap();
        unit.owner_id = Some(owner_id("EX01"));
        unit.work_area = Some("North Pit".into());
        unit.loads = 6;
        queue
            .put(MutationDraft::new(unit.id.record_id(), unit.to_fields()))
            .await
            .unwrap();

        let monitor = ConnectivityMonitor::new(Connectivity::Offline);
        let dispatcher = MutationDispatcher::new(
            seeded_model().into_shared(),
            queue,
            None,
            Arc::new(InMemoryRecordStore::new()),
            monitor.handle(),
            Arc::new(SyncMetrics::new()),
            Duration::from_secs(5),
        );

        assert_eq!(dispatcher.restore_pending().await.unwrap(), 1);
        let model = dispatcher.model().read().unwrap();
        let restored = model.unit(&unit_id("T1")).unwrap();
        assert_eq!(restored, &unit);
        assert_eq!(model.units_of(&owner_id("EX01")).len(), 1);
        model.check_invariants().unwrap();
    }
}
