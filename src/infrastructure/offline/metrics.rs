use crate::domain::entities::DrainReport;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcomeStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetricsSnapshot {
    pub total_success: u64,
    pub total_failure: u64,
    pub consecutive_failure: u64,
    pub drains_completed: u64,
    pub drains_skipped: u64,
    pub last_success_ms: Option<u64>,
    pub last_failure_ms: Option<u64>,
    pub last_outcome: Option<WriteOutcomeStatus>,
    pub last_run_id: Option<String>,
    pub last_trigger: Option<String>,
    pub last_duration_ms: Option<u64>,
    pub last_success_count: Option<u32>,
    pub last_failure_count: Option<u32>,
    pub last_pending_count: Option<u32>,
}

#[derive(Default, Clone)]
struct LastDrainMetadata {
    last_outcome: Option<WriteOutcomeStatus>,
    run_id: Option<String>,
    trigger: Option<String>,
    duration_ms: Option<u64>,
    success_count: Option<u32>,
    failure_count: Option<u32>,
    pending_count: Option<u32>,
}

/// Counters for remote writes, dispatched and drained alike.
///
/// One instance lives in the sync context; there is no process-wide registry.
pub struct SyncMetrics {
    success: AtomicU64,
    failure: AtomicU64,
    consecutive_failure: AtomicU64,
    drains_completed: AtomicU64,
    drains_skipped: AtomicU64,
    last_success_ms: AtomicU64,
    last_failure_ms: AtomicU64,
    metadata: Mutex<LastDrainMetadata>,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self {
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            consecutive_failure: AtomicU64::new(0),
            drains_completed: AtomicU64::new(0),
            drains_skipped: AtomicU64::new(0),
            last_success_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            metadata: Mutex::new(LastDrainMetadata::default()),
        }
    }

    pub fn record_write(&self, status: WriteOutcomeStatus) {
        match status {
            WriteOutcomeStatus::Success => {
                self.success.fetch_add(1, Ordering::Relaxed);
                self.last_success_ms
                    .store(current_unix_ms(), Ordering::Relaxed);
                self.consecutive_failure.store(0, Ordering::Relaxed);
            }
            WriteOutcomeStatus::Failure => {
                self.failure.fetch_add(1, Ordering::Relaxed);
                self.last_failure_ms
                    .store(current_unix_ms(), Ordering::Relaxed);
                self.consecutive_failure.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Ok(mut guard) = self.metadata.lock() {
            guard.last_outcome = Some(status);
        }
    }

    pub fn record_drain(&self, report: &DrainReport) {
        self.drains_completed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut guard) = self.metadata.lock() {
            guard.run_id = Some(report.run_id.to_string());
            guard.trigger = Some(report.trigger.to_string());
            guard.duration_ms = Some(report.duration_ms());
            guard.success_count = Some(report.succeeded);
            guard.failure_count = Some(report.failed);
            guard.pending_count = Some(report.pending);
        }
    }

    pub fn record_skipped_drain(&self) {
        self.drains_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        let metadata = self
            .metadata
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|_| LastDrainMetadata::default());

        SyncMetricsSnapshot {
            total_success: self.success.load(Ordering::Relaxed),
            total_failure: self.failure.load(Ordering::Relaxed),
            consecutive_failure: self.consecutive_failure.load(Ordering::Relaxed),
            drains_completed: self.drains_completed.load(Ordering::Relaxed),
            drains_skipped: self.drains_skipped.load(Ordering::Relaxed),
            last_success_ms: to_option(self.last_success_ms.load(Ordering::Relaxed)),
            last_failure_ms: to_option(self.last_failure_ms.load(Ordering::Relaxed)),
            last_outcome: metadata.last_outcome,
            last_run_id: metadata.run_id,
            last_trigger: metadata.trigger,
            last_duration_ms: metadata.duration_ms,
            last_success_count: metadata.success_count,
            last_failure_count: metadata.failure_count,
            last_pending_count: metadata.pending_count,
        }
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn to_option(value: u64) -> Option<u64> {
    if value == 0 {
        None
    } else {
        Some(value)
    }
}

fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
