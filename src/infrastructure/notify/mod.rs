mod broadcast;
mod tracing_notifier;

pub use broadcast::BroadcastNotifier;
pub use tracing_notifier::TracingNotifier;
