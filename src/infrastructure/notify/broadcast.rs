use crate::application::ports::SyncNotifier;
use crate::domain::entities::SyncNotice;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 64;

/// Fans notices out to any number of subscribers.
///
/// Sending with no subscriber attached is not an error; the notice is dropped.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<SyncNotice>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncNotifier for BroadcastNotifier {
    fn notify(&self, notice: &SyncNotice) {
        if self.sender.send(notice.clone()).is_err() {
            tracing::trace!(target: "sync::notice", "no notice subscribers");
        }
    }
}
