use crate::application::ports::{MutationQueue, RemoteError, RemoteRecordStore, SyncNotifier};
use crate::domain::entities::{
    DrainOutcome, DrainReport, DrainTrigger, MutationRecord, SyncNotice,
};
use crate::infrastructure::offline::{MirrorCache, SyncMetrics, WriteOutcomeStatus};
use crate::shared::error::AppError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Sends one record's full field set, bounded by `timeout`.
pub(crate) async fn write_record(
    remote: &dyn RemoteRecordStore,
    record: &MutationRecord,
    timeout: Duration,
) -> Result<(), RemoteError> {
    match tokio::time::timeout(timeout, remote.write_fields(&record.record_id, &record.fields))
        .await
    {
        Ok(result) => result,
        Err(_) => Err(RemoteError::Ambiguous(format!(
            "no response within {}ms",
            timeout.as_millis()
        ))),
    }
}

#[derive(Default)]
struct DrainTally {
    succeeded: u32,
    failed: u32,
}

/// Flushes queued mutations to the remote authority.
///
/// Records are sent one at a time. A failed record stays queued and the drain
/// moves on. Only one drain (durable or mirror) runs at a time; a second
/// caller gets [`DrainOutcome::AlreadyRunning`] back immediately.
pub struct ReconciliationService {
    queue: Arc<dyn MutationQueue>,
    mirror: Option<Arc<MirrorCache>>,
    remote: Arc<dyn RemoteRecordStore>,
    notifier: Arc<dyn SyncNotifier>,
    metrics: Arc<SyncMetrics>,
    write_timeout: Duration,
    gate: Mutex<()>,
}

impl ReconciliationService {
    pub fn new(
        queue: Arc<dyn MutationQueue>,
        mirror: Option<Arc<MirrorCache>>,
        remote: Arc<dyn RemoteRecordStore>,
        notifier: Arc<dyn SyncNotifier>,
        metrics: Arc<SyncMetrics>,
        write_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            mirror,
            remote,
            notifier,
            metrics,
            write_timeout,
            gate: Mutex::new(()),
        }
    }

    /// Manual retry.
    pub async fn drain(&self) -> Result<DrainOutcome, AppError> {
        self.drain_with(DrainTrigger::Manual).await
    }

    pub async fn drain_with(&self, trigger: DrainTrigger) -> Result<DrainOutcome, AppError> {
        let Ok(_guard) = self.gate.try_lock() else {
            self.skip(trigger);
            return Ok(DrainOutcome::AlreadyRunning);
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let queued = self.queue.get_all().await?;
        tracing::info!(
            target: "sync::drain",
            %run_id,
            %trigger,
            queued = queued.len(),
            "drain started"
        );

        let mut tally = DrainTally::default();
        for snapshot in queued {
            // 最新の内容を送る
            let record = match self.queue.get(&snapshot.record_id).await {
                Ok(Some(record)) => record,
                // 他の経路で送信済み
                Ok(None) => continue,
                Err(err) => {
                    // 読めなかったレコードは失敗扱いにして続行する
                    tally.failed += 1;
                    self.metrics.record_write(WriteOutcomeStatus::Failure);
                    tracing::warn!(
                        target: "sync::drain",
                        %run_id,
                        record_id = %snapshot.record_id,
                        error = %err,
                        "queued record unreadable, left for the next drain"
                    );
                    continue;
                }
            };

            match write_record(self.remote.as_ref(), &record, self.write_timeout).await {
                Ok(()) => {
                    tally.succeeded += 1;
                    self.metrics.record_write(WriteOutcomeStatus::Success);
                    self.clear_confirmed(&record).await;
                }
                Err(err) => {
                    tally.failed += 1;
                    self.metrics.record_write(WriteOutcomeStatus::Failure);
                    tracing::warn!(
                        target: "sync::drain",
                        %run_id,
                        record_id = %record.record_id,
                        version = record.version,
                        kind = err.kind(),
                        error = %err,
                        "remote write failed, record stays queued"
                    );
                }
            }
        }

        let pending = match self.queue.len().await {
            Ok(pending) => pending,
            Err(err) => {
                tracing::warn!(
                    target: "sync::drain",
                    %run_id,
                    error = %err,
                    "queue length unavailable, reporting failed records as pending"
                );
                tally.failed
            }
        };
        let report = self.finish(run_id, trigger, tally, pending, started_at);
        self.notifier.notify(&SyncNotice::DrainFinished {
            report: report.clone(),
        });
        Ok(DrainOutcome::Completed(report))
    }

    /// Flushes mirror-only documents (those with no durable queue entry).
    pub async fn drain_mirror(&self) -> Result<DrainOutcome, AppError> {
        let Ok(_guard) = self.gate.try_lock() else {
            self.skip(DrainTrigger::Reconnect);
            return Ok(DrainOutcome::AlreadyRunning);
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let Some(mirror) = &self.mirror else {
            let report = self.finish(
                run_id,
                DrainTrigger::Reconnect,
                DrainTally::default(),
                0,
                started_at,
            );
            return Ok(DrainOutcome::Completed(report));
        };

        let mut tally = DrainTally::default();
        let mut pending = 0u32;
        for doc in mirror.get_cached_docs().await {
            // 永続キューにあるものはそちらで送る
            match self.queue.get(&doc.record_id).await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(err) => {
                    tally.failed += 1;
                    pending += 1;
                    self.metrics.record_write(WriteOutcomeStatus::Failure);
                    tracing::warn!(
                        target: "sync::mirror",
                        %run_id,
                        record_id = %doc.record_id,
                        error = %err,
                        "queue lookup failed, mirror document left in place"
                    );
                    continue;
                }
            }

            match write_record(self.remote.as_ref(), &doc, self.write_timeout).await {
                Ok(()) => {
                    tally.succeeded += 1;
                    self.metrics.record_write(WriteOutcomeStatus::Success);
                    if let Err(err) = mirror.remove_cached_doc_if_matches(&doc).await {
                        tracing::warn!(
                            target: "sync::mirror",
                            record_id = %doc.record_id,
                            error = %err,
                            "failed to drop synced mirror document"
                        );
                    }
                }
                Err(err) => {
                    tally.failed += 1;
                    pending += 1;
                    self.metrics.record_write(WriteOutcomeStatus::Failure);
                    tracing::warn!(
                        target: "sync::mirror",
                        %run_id,
                        record_id = %doc.record_id,
                        kind = err.kind(),
                        error = %err,
                        "mirror document not synced"
                    );
                }
            }
        }

        let report = self.finish(run_id, DrainTrigger::Reconnect, tally, pending, started_at);
        if report.attempted() > 0 {
            self.notifier.notify(&SyncNotice::DrainFinished {
                report: report.clone(),
            });
        }
        Ok(DrainOutcome::Completed(report))
    }

    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    async fn clear_confirmed(&self, record: &MutationRecord) {
        match self
            .queue
            .remove_if_current(&record.record_id, record.version)
            .await
        {
            Ok(true) => {}
            // 送信中に新しい編集で置き換わった
            Ok(false) => tracing::debug!(
                target: "sync::drain",
                record_id = %record.record_id,
                version = record.version,
                "record replaced during write, newer entry kept"
            ),
            Err(err) => tracing::warn!(
                target: "sync::drain",
                record_id = %record.record_id,
                error = %err,
                "confirmed record could not be dequeued, it will be resent"
            ),
        }

        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.remove_cached_doc_if_matches(record).await {
                tracing::warn!(
                    target: "sync::mirror",
                    record_id = %record.record_id,
                    error = %err,
                    "failed to drop synced mirror document"
                );
            }
        }
    }

    fn skip(&self, trigger: DrainTrigger) {
        self.metrics.record_skipped_drain();
        tracing::debug!(
            target: "sync::drain",
            %trigger,
            "drain already in progress, skipping"
        );
    }

    fn finish(
        &self,
        run_id: Uuid,
        trigger: DrainTrigger,
        tally: DrainTally,
        pending: u32,
        started_at: DateTime<Utc>,
    ) -> DrainReport {
        let report = DrainReport {
            run_id,
            trigger,
            succeeded: tally.succeeded,
            failed: tally.failed,
            pending,
            started_at,
            finished_at: Utc::now(),
        };
        self.metrics.record_drain(&report);
        tracing::info!(
            target: "sync::drain",
            %run_id,
            %trigger,
            succeeded = report.succeeded,
            failed = report.failed,
            pending = report.pending,
            duration_ms = report.duration_ms(),
            "drain finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{DrainStatus, MutationDraft};
    use crate::domain::value_objects::{field_map, FieldMap, FieldValue, RecordId};
    use crate::infrastructure::notify::BroadcastNotifier;
    use crate::infrastructure::offline::SqliteMutationQueue;
    use crate::infrastructure::remote::InMemoryRecordStore;
    use async_trait::async_trait;
    use tokio::sync::{Notify, Semaphore};

    struct Harness {
        queue: Arc<SqliteMutationQueue>,
        mirror: Arc<MirrorCache>,
        remote: Arc<InMemoryRecordStore>,
        notifier: Arc<BroadcastNotifier>,
        metrics: Arc<SyncMetrics>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                queue: Arc::new(SqliteMutationQueue::in_memory()),
                mirror: Arc::new(MirrorCache::in_memory()),
                remote: Arc::new(InMemoryRecordStore::new()),
                notifier: Arc::new(BroadcastNotifier::new()),
                metrics: Arc::new(SyncMetrics::new()),
            }
        }

        fn service(&self) -> ReconciliationService {
            self.service_with(self.remote.clone(), Duration::from_secs(5))
        }

        fn service_with(
            &self,
            remote: Arc<dyn RemoteRecordStore>,
            write_timeout: Duration,
        ) -> ReconciliationService {
            ReconciliationService::new(
                self.queue.clone(),
                Some(self.mirror.clone()),
                remote,
                self.notifier.clone(),
                self.metrics.clone(),
                write_timeout,
            )
        }

        async fn enqueue(&self, id: &str, loads: i64) -> MutationRecord {
            let record = self
                .queue
                .put(MutationDraft::new(record_id(id), field_map([("loads", loads)])))
                .await
                .unwrap();
            self.mirror.cache_doc(record.clone()).await.unwrap();
            record
        }
    }

    fn record_id(raw: &str) -> RecordId {
        RecordId::new(raw.to_string()).unwrap()
    }

    /// Blocks every write until released.
    struct GatedRemote {
        started: Notify,
        release: Semaphore,
        inner: InMemoryRecordStore,
    }

    #[async_trait]
    impl RemoteRecordStore for GatedRemote {
        async fn write_fields(
            &self,
            record_id: &RecordId,
            fields: &FieldMap,
        ) -> Result<(), RemoteError> {
            self.started.notify_one();
            let _permit = self.release.acquire().await.unwrap();
            self.inner.write_fields(record_id, fields).await
        }

        async fn read_fields(
            &self,
            record_id: &RecordId,
            names: &[&str],
        ) -> Result<FieldMap, RemoteError> {
            self.inner.read_fields(record_id, names).await
        }
    }

    #[tokio::test]
    async fn test_drain_keeps_exactly_the_failed_records() {
        let harness = Harness::new();
        for (index, id) in ["R1", "R2", "R3", "R4", "R5"].iter().enumerate() {
            harness.enqueue(id, index as i64).await;
        }
        harness.remote.reject(record_id("R2")).await;
        harness.remote.reject(record_id("R4")).await;
        let mut notices = harness.notifier.subscribe();

        let outcome = harness.service().drain().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.pending, 2);
        assert_eq!(report.status(), DrainStatus::Partial);

        let left: Vec<String> = harness
            .queue
            .get_all()
            .await
            .unwrap()
            .into_iter()
            .map(|record| record.record_id.to_string())
            .collect();
        assert_eq!(left, vec!["R2", "R4"]);
        assert_eq!(harness.mirror.len().await, 2);

        match notices.recv().await.unwrap() {
            SyncNotice::DrainFinished { report } => assert_eq!(report.failed, 2),
            other => panic!("unexpected notice: {other:?}"),
        }
        assert_eq!(harness.metrics.snapshot().total_failure, 2);
    }

    /// Fails `get` for one record id, delegating everything else.
    struct UnreadableRecordQueue {
        inner: SqliteMutationQueue,
        broken: RecordId,
    }

    #[async_trait]
    impl MutationQueue for UnreadableRecordQueue {
        async fn put(&self, draft: MutationDraft) -> Result<MutationRecord, AppError> {
            self.inner.put(draft).await
        }

        async fn get_all(&self) -> Result<Vec<MutationRecord>, AppError> {
            self.inner.get_all().await
        }

        async fn get(&self, record_id: &RecordId) -> Result<Option<MutationRecord>, AppError> {
            if record_id == &self.broken {
                return Err(AppError::StorageUnavailable("disk I/O error".into()));
            }
            self.inner.get(record_id).await
        }

        async fn remove(&self, record_id: &RecordId) -> Result<(), AppError> {
            self.inner.remove(record_id).await
        }

        async fn remove_if_current(
            &self,
            record_id: &RecordId,
            version: u64,
        ) -> Result<bool, AppError> {
            self.inner.remove_if_current(record_id, version).await
        }

        async fn len(&self) -> Result<u32, AppError> {
            self.inner.len().await
        }
    }

    #[tokio::test]
    async fn test_unreadable_record_does_not_stop_drain() {
        let queue = Arc::new(UnreadableRecordQueue {
            inner: SqliteMutationQueue::in_memory(),
            broken: record_id("R2"),
        });
        for id in ["R1", "R2", "R3"] {
            queue
                .put(MutationDraft::new(record_id(id), field_map([("loads", 1_i64)])))
                .await
                .unwrap();
        }
        let remote = Arc::new(InMemoryRecordStore::new());
        let notifier = Arc::new(BroadcastNotifier::new());
        let mut notices = notifier.subscribe();
        let metrics = Arc::new(SyncMetrics::new());
        let service = ReconciliationService::new(
            queue.clone(),
            None,
            remote.clone(),
            notifier.clone(),
            metrics.clone(),
            Duration::from_secs(5),
        );

        let outcome = service.drain().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!((report.succeeded, report.failed, report.pending), (2, 1, 1));
        assert!(remote.record(&record_id("R3")).await.is_some());
        assert!(remote.record(&record_id("R2")).await.is_none());
        assert!(matches!(
            notices.recv().await.unwrap(),
            SyncNotice::DrainFinished { .. }
        ));
        assert_eq!(metrics.snapshot().drains_completed, 1);
    }

    #[tokio::test]
    async fn test_drain_on_empty_queue_reports_nothing_to_sync() {
        let harness = Harness::new();
        let outcome = harness.service().drain().await.unwrap();
        assert_eq!(
            outcome.report().unwrap().status(),
            DrainStatus::NothingToSync
        );
        assert_eq!(harness.remote.write_count().await, 0);
    }

    #[tokio::test]
    async fn test_overlapping_drain_is_a_no_op() {
        let harness = Harness::new();
        harness.enqueue("R1", 1).await;
        harness.enqueue("R2", 2).await;

        let gated = Arc::new(GatedRemote {
            started: Notify::new(),
            release: Semaphore::new(0),
            inner: InMemoryRecordStore::new(),
        });
        let service = Arc::new(harness.service_with(gated.clone(), Duration::from_secs(5)));

        let first = tokio::spawn({
            let service = service.clone();
            async move { service.drain().await }
        });
        gated.started.notified().await;
        assert!(service.is_running());

        let second = service.drain().await.unwrap();
        assert!(second.is_already_running());

        gated.release.add_permits(16);
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.report().unwrap().succeeded, 2);
        assert_eq!(gated.inner.write_count().await, 2);
        assert_eq!(harness.metrics.snapshot().drains_skipped, 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure_and_keeps_record() {
        let harness = Harness::new();
        harness.enqueue("R1", 1).await;
        harness
            .remote
            .set_write_delay(Some(Duration::from_millis(500)))
            .await;

        let service = harness.service_with(harness.remote.clone(), Duration::from_millis(20));
        let outcome = service.drain().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.status(), DrainStatus::NoneSynced);
        assert_eq!(harness.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_confirmed_write_keeps_newer_entry() {
        let harness = Harness::new();
        let stale = harness.enqueue("R1", 5).await;
        let fresh = harness.enqueue("R1", 9).await;

        let service = harness.service();
        service.clear_confirmed(&stale).await;
        assert_eq!(harness.queue.get(&record_id("R1")).await.unwrap(), Some(fresh.clone()));
        assert!(harness.mirror.contains(&record_id("R1")).await);

        service.drain().await.unwrap();
        let remote = harness.remote.record(&record_id("R1")).await.unwrap();
        assert_eq!(remote["loads"], FieldValue::Integer(9));
        assert_eq!(harness.queue.len().await.unwrap(), 0);
        assert!(harness.mirror.is_empty().await);
    }

    #[tokio::test]
    async fn test_drain_mirror_flushes_only_mirror_only_docs() {
        let harness = Harness::new();
        harness.enqueue("R1", 1).await;
        let orphan = MutationRecord::unversioned(MutationDraft::new(
            record_id("R2"),
            field_map([("loads", 4_i64)]),
        ));
        harness.mirror.cache_doc(orphan).await.unwrap();

        let outcome = harness.service().drain_mirror().await.unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(harness.remote.record(&record_id("R1")).await.is_none());
        assert!(harness.remote.record(&record_id("R2")).await.is_some());
        assert!(harness.mirror.contains(&record_id("R1")).await);
        assert!(!harness.mirror.contains(&record_id("R2")).await);
    }
}
