// User-facing notifications

/// Sink for messages meant for the user rather than the log
pub trait Notifier: Send + Sync {
    fn error(&self, title: &str, description: &str);
    fn info(&self, title: &str, description: &str);
}

/// Renders notifications as tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn error(&self, title: &str, description: &str) {
        tracing::error!(title = %title, "{}", description);
    }

    fn info(&self, title: &str, description: &str) {
        tracing::info!(title = %title, "{}", description);
    }
}
