pub mod metrics;
pub mod mirror_cache;
mod rows;
pub mod sqlite_queue;

pub use metrics::{SyncMetrics, SyncMetricsSnapshot, WriteOutcomeStatus};
pub use mirror_cache::MirrorCache;
pub use sqlite_queue::SqliteMutationQueue;
