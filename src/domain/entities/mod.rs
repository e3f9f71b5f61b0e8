pub mod connectivity;
pub mod drain_report;
pub mod mutation_record;
pub mod sync_notice;

pub use connectivity::Connectivity;
pub use drain_report::{DrainOutcome, DrainReport, DrainStatus, DrainTrigger};
pub use mutation_record::{MutationDraft, MutationRecord};
pub use sync_notice::SyncNotice;
