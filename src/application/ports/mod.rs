pub mod mutation_queue;
pub mod remote_store;
pub mod sync_notifier;

pub use mutation_queue::MutationQueue;
pub use remote_store::{RemoteRecordStore, RemoteError};
pub use sync_notifier::SyncNotifier;
