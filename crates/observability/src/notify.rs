use std::sync::Mutex;

use cronq_core::ExecutionResult;

/// A notification about one finished attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub job: String,
    pub attempt: u32,
    pub result: ExecutionResult,
}

impl Notification {
    pub fn new(job: impl Into<String>, attempt: u32, result: ExecutionResult) -> Self {
        Self {
            job: job.into(),
            attempt,
            result,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// Notification channel (mail, chat, pager, ...). Delivery is external.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()>;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        ::tracing::info!(
            job = %notification.job,
            attempt = notification.attempt,
            success = notification.is_success(),
            error = notification.result.error().unwrap_or(""),
            "job notification"
        );
        Ok(())
    }
}

/// Records notifications (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Notifier for InMemoryNotifier {
    fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent
            .lock()
            .map_err(|_| anyhow::anyhow!("notifier lock poisoned"))?
            .push(notification.clone());
        Ok(())
    }
}
