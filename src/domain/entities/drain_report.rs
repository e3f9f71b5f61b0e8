use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainTrigger {
    Manual,
    Reconnect,
    Startup,
}

impl DrainTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            DrainTrigger::Manual => "manual",
            DrainTrigger::Reconnect => "reconnect",
            DrainTrigger::Startup => "startup",
        }
    }
}

impl fmt::Display for DrainTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainStatus {
    NothingToSync,
    AllSynced,
    Partial,
    NoneSynced,
}

/// Aggregate result of one drain cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub run_id: Uuid,
    pub trigger: DrainTrigger,
    pub succeeded: u32,
    pub failed: u32,
    /// Queue length once the cycle finished, including edits made meanwhile.
    pub pending: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DrainReport {
    pub fn status(&self) -> DrainStatus {
        match (self.succeeded, self.failed) {
            (0, 0) => DrainStatus::NothingToSync,
            (_, 0) => DrainStatus::AllSynced,
            (0, _) => DrainStatus::NoneSynced,
            _ => DrainStatus::Partial,
        }
    }

    pub fn is_full_success(&self) -> bool {
        self.failed == 0
    }

    pub fn attempted(&self) -> u32 {
        self.succeeded + self.failed
    }

    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another drain held the guard; nothing was processed.
    AlreadyRunning,
}

impl DrainOutcome {
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::Completed(report) => Some(report),
            DrainOutcome::AlreadyRunning => None,
        }
    }

    pub fn is_already_running(&self) -> bool {
        matches!(self, DrainOutcome::AlreadyRunning)
    }
}
