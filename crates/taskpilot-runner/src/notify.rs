//! Outbound user notifications.

/// Delivery channel for assistant messages. Fire-and-forget: the
/// scheduler never waits on delivery and never fails a run over it.
pub trait Notifier: Send + Sync {
    fn send(&self, account_id: &str, message: &str);
}

/// Logs messages instead of delivering them. Used when no chat channel
/// is configured and as the test double.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, account_id: &str, message: &str) {
        tracing::info!(account = account_id, message, "📣 notification");
    }
}
