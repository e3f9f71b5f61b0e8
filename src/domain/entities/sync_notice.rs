use super::drain_report::{DrainReport, DrainStatus};
use serde::Serialize;

/// User-visible status change emitted by the sync layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncNotice {
    Offline,
    Online,
    DrainFinished { report: DrainReport },
}

impl SyncNotice {
    pub fn message(&self) -> String {
        match self {
            SyncNotice::Offline => {
                "You are offline. Changes are saved on this device and will sync when the connection returns.".to_string()
            }
            SyncNotice::Online => "Back online. Syncing queued changes.".to_string(),
            SyncNotice::DrainFinished { report } => match report.status() {
                DrainStatus::NothingToSync => "No pending changes.".to_string(),
                DrainStatus::AllSynced => {
                    format!("All changes synced ({}).", report.succeeded)
                }
                DrainStatus::Partial => format!(
                    "{} changes synced, {} still pending. Pending changes are safely queued and will be retried.",
                    report.succeeded, report.failed
                ),
                DrainStatus::NoneSynced => format!(
                    "{} changes could not be synced yet. They are safely queued and will be retried.",
                    report.failed
                ),
            },
        }
    }
}
