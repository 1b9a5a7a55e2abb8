use tracing::info;

/// Receives ordered, human-readable progress messages.
///
/// Notifications are delivered synchronously at the start of each stage.
pub trait ProgressSink: Send + Sync {
    fn notify(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn notify(&self, message: &str) {
        self(message)
    }
}

/// Sink that forwards every message to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn notify(&self, message: &str) {
        info!(target: "tryon.progress", "{}", message);
    }
}

/// Sink that drops every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn notify(&self, _message: &str) {}
}
