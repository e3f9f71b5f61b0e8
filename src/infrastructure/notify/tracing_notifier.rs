use crate::application::ports::SyncNotifier;
use crate::domain::entities::SyncNotice;

/// Writes every notice to the log. Used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl SyncNotifier for TracingNotifier {
    fn notify(&self, notice: &SyncNotice) {
        match notice {
            SyncNotice::DrainFinished { report } if !report.is_full_success() => {
                tracing::warn!(
                    target: "sync::notice",
                    run_id = %report.run_id,
                    succeeded = report.succeeded,
                    failed = report.failed,
                    "{}",
                    notice.message()
                );
            }
            _ => tracing::info!(target: "sync::notice", "{}", notice.message()),
        }
    }
}
