use tracing::info;

/// Outbound alert sink. Delivery is fire-and-forget; implementations own any
/// user-consent handling and must not block the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(target: "notifications", "{} - {}", title, body);
    }
}
