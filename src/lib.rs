pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
mod state;

pub use application::ports::{MutationQueue, RemoteError, RemoteRecordStore, SyncNotifier};
pub use application::services::{
    AppliedMutation, ConnectivityHandle, ConnectivityMonitor, MutationDispatcher, PendingWrite,
    ReconciliationService, WriteOutcome,
};
pub use shared::{AppConfig, AppError};
pub use state::SyncContext;

/// Installs the global tracing subscriber. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    // 二重初期化は無視する
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haul_sync=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
