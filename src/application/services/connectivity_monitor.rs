use super::reconciliation_service::ReconciliationService;
use crate::application::ports::SyncNotifier;
use crate::domain::entities::{Connectivity, DrainTrigger, SyncNotice};
use crate::shared::config::SyncConfig;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Read-only view of the current connectivity.
#[derive(Debug, Clone)]
pub struct ConnectivityHandle {
    receiver: watch::Receiver<Connectivity>,
}

impl ConnectivityHandle {
    pub fn current(&self) -> Connectivity {
        *self.receiver.borrow()
    }

    pub fn is_online(&self) -> bool {
        self.current().is_online()
    }
}

/// Holds the connectivity level and reacts to its transitions.
///
/// Level-triggered: only the latest value is observed, so a quick
/// offline/online flap may produce a single reaction.
pub struct ConnectivityMonitor {
    sender: watch::Sender<Connectivity>,
}

impl ConnectivityMonitor {
    pub fn new(initial: Connectivity) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    pub fn set_online(&self) -> bool {
        self.set(Connectivity::Online)
    }

    pub fn set_offline(&self) -> bool {
        self.set(Connectivity::Offline)
    }

    /// Returns `true` when the level actually changed.
    pub fn set(&self, connectivity: Connectivity) -> bool {
        self.sender.send_if_modified(|current| {
            if *current == connectivity {
                return false;
            }
            *current = connectivity;
            true
        })
    }

    pub fn current(&self) -> Connectivity {
        *self.sender.borrow()
    }

    pub fn handle(&self) -> ConnectivityHandle {
        ConnectivityHandle {
            receiver: self.sender.subscribe(),
        }
    }

    /// Starts the transition listener.
    ///
    /// Going online notifies and kicks off one drain in its own task; going
    /// offline only notifies. The task ends when the monitor is dropped.
    pub fn spawn(
        &self,
        reconciler: Arc<ReconciliationService>,
        notifier: Arc<dyn SyncNotifier>,
        config: SyncConfig,
    ) -> JoinHandle<()> {
        let mut receiver = self.sender.subscribe();
        tokio::spawn(async move {
            let mut last = *receiver.borrow_and_update();
            while receiver.changed().await.is_ok() {
                let now = *receiver.borrow_and_update();
                // 同じ状態への通知は無視する
                if now == last {
                    continue;
                }
                last = now;
                tracing::info!(target: "sync::connectivity", state = %now, "connectivity changed");

                match now {
                    Connectivity::Online => {
                        notifier.notify(&SyncNotice::Online);
                        if config.drain_on_reconnect {
                            spawn_reconnect_drain(reconciler.clone(), &config);
                        }
                    }
                    Connectivity::Offline => notifier.notify(&SyncNotice::Offline),
                }
            }
            tracing::debug!(target: "sync::connectivity", "connectivity listener stopped");
        })
    }
}

fn spawn_reconnect_drain(reconciler: Arc<ReconciliationService>, config: &SyncConfig) {
    let drain_mirror = config.mirror_enabled && config.drain_mirror_on_reconnect;
    tokio::spawn(async move {
        if let Err(err) = reconciler.drain_with(DrainTrigger::Reconnect).await {
            tracing::error!(target: "sync::connectivity", error = %err, "reconnect drain failed");
        }
        if drain_mirror {
            if let Err(err) = reconciler.drain_mirror().await {
                tracing::error!(
                    target: "sync::connectivity",
                    error = %err,
                    "reconnect mirror drain failed"
                );
            }
        }
    });
}
