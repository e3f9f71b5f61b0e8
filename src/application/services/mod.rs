pub mod connectivity_monitor;
pub mod dispatcher;
pub mod reconciliation_service;

pub use connectivity_monitor::{ConnectivityHandle, ConnectivityMonitor};
pub use dispatcher::{AppliedMutation, MutationDispatcher, PendingWrite, WriteOutcome};
pub use reconciliation_service::ReconciliationService;
