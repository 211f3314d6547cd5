use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A message published on the job event bus.
///
/// Produced by `Event` jobs (user events) and, when enabled, by the lifecycle
/// coordinator (`job.started`, `job.succeeded`, `job.retrying`, `job.failed`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Stable event name (e.g. "report.ready", "job.failed").
    pub name: String,
    /// Name of the job that emitted the event.
    pub job: Option<String>,
    pub data: JsonValue,
    pub occurred_at: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(name: impl Into<String>, data: JsonValue) -> Self {
        Self {
            name: name.into(),
            job: None,
            data,
            occurred_at: Utc::now(),
        }
    }

    pub fn for_job(mut self, job: impl Into<String>) -> Self {
        self.job = Some(job.into());
        self
    }
}
