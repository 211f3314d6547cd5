//! Tracing, job logging, metrics and notification seams.
//!
//! The lifecycle engine calls these collaborators but owns none of their
//! persistence or delivery. Every call site swallows their failures.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Job-level log records and sinks.
pub mod logging;

/// Counter/histogram collection.
pub mod metrics;

/// Success/failure notification channels.
pub mod notify;

pub use self::tracing::{LogFormat, init_with};
pub use logging::{InMemoryLogSink, JobLogRecord, JobLogSink, Masker, TracingLogSink};
pub use metrics::{InMemoryMetrics, MetricsCollector, NoopMetrics};
pub use notify::{InMemoryNotifier, Notification, Notifier, TracingNotifier};
