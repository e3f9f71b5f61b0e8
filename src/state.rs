use crate::application::ports::{RemoteRecordStore, SyncNotifier};
use crate::application::services::{
    ConnectivityMonitor, MutationDispatcher, ReconciliationService,
};
use crate::domain::assignment::{AssignmentModel, SharedAssignmentModel};
use crate::domain::entities::{Connectivity, DrainOutcome, DrainTrigger};
use crate::infrastructure::offline::{MirrorCache, SqliteMutationQueue, SyncMetrics};
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Everything the editor needs, built once at startup and passed around.
pub struct SyncContext {
    pub config: AppConfig,
    pub model: SharedAssignmentModel,
    pub queue: Arc<SqliteMutationQueue>,
    pub mirror: Option<Arc<MirrorCache>>,
    pub metrics: Arc<SyncMetrics>,
    pub connectivity: Arc<ConnectivityMonitor>,
    pub reconciler: Arc<ReconciliationService>,
    pub dispatcher: Arc<MutationDispatcher>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl SyncContext {
    /// Wires the components and starts the connectivity listener.
    ///
    /// `model` is the state seeded from the remote authority. The context
    /// starts online; call `connectivity.set_offline()` if the host knows better.
    pub async fn initialize(
        config: AppConfig,
        model: AssignmentModel,
        remote: Arc<dyn RemoteRecordStore>,
        notifier: Arc<dyn SyncNotifier>,
    ) -> Result<Self, AppError> {
        config.validate().map_err(AppError::ConfigurationError)?;

        let model = model.into_shared();
        let queue = Arc::new(SqliteMutationQueue::from_config(&config.storage));
        let mirror = if config.sync.mirror_enabled {
            Some(Arc::new(MirrorCache::from_config(&config.storage).await))
        } else {
            None
        };
        let metrics = Arc::new(SyncMetrics::new());
        let connectivity = Arc::new(ConnectivityMonitor::new(Connectivity::Online));
        let write_timeout = config.remote.write_timeout();

        let reconciler = Arc::new(ReconciliationService::new(
            queue.clone(),
            mirror.clone(),
            remote.clone(),
            notifier.clone(),
            metrics.clone(),
            write_timeout,
        ));
        let dispatcher = Arc::new(MutationDispatcher::new(
            model.clone(),
            queue.clone(),
            mirror.clone(),
            remote,
            connectivity.handle(),
            metrics.clone(),
            write_timeout,
        ));
        let listener = connectivity.spawn(reconciler.clone(), notifier, config.sync.clone());

        tracing::info!(
            target: "sync::context",
            data_dir = %config.storage.data_dir.display(),
            mirror = config.sync.mirror_enabled,
            "sync context initialized"
        );

        Ok(Self {
            config,
            model,
            queue,
            mirror,
            metrics,
            connectivity,
            reconciler,
            dispatcher,
            listener: Mutex::new(Some(listener)),
        })
    }

    /// Restores queued intents into the model and, when online, drains them.
    pub async fn resume(&self) -> Result<(usize, Option<DrainOutcome>), AppError> {
        let restored = self.dispatcher.restore_pending().await?;
        if !self.connectivity.current().is_online() {
            return Ok((restored, None));
        }
        let outcome = self.reconciler.drain_with(DrainTrigger::Startup).await?;
        Ok((restored, Some(outcome)))
    }

    pub async fn shutdown(&self) {
        let listener = self
            .listener
            .lock()
            .ok()
            .and_then(|mut guard| guard.take());
        if let Some(listener) = listener {
            listener.abort();
        }
        self.queue.close().await;
        tracing::info!(target: "sync::context", "sync context shut down");
    }
}
