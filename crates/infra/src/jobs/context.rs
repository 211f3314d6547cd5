//! Per-run execution context.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use cronq_core::{Job, RetryConfig, RunnerConfig};
use cronq_events::Worker;

/// Which driver triggered the run.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    Cron,
    Queue,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobSource::Cron => "cron",
            JobSource::Queue => "queue",
        }
    }
}

impl core::fmt::Display for JobSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable configuration of one lifecycle run.
///
/// Built once (via the `with_*` methods) before the run starts and only read
/// afterwards. A queue worker is present iff the source is `Queue`.
#[derive(Clone)]
pub struct ExecutionContext {
    source: JobSource,
    max_retries: u32,
    notify_on_success: bool,
    notify_on_failure: bool,
    single_instance: bool,
    queue_worker: Option<Arc<dyn Worker>>,
    retry: RetryConfig,
    events_enabled: bool,
    metadata: Map<String, JsonValue>,
}

impl ExecutionContext {
    /// Context for a cron-triggered run.
    pub fn cron() -> Self {
        Self::new(JobSource::Cron, None)
    }

    /// Context for a queue-triggered run finalized through `worker`.
    pub fn queue(worker: Arc<dyn Worker>) -> Self {
        Self::new(JobSource::Queue, Some(worker))
    }

    fn new(source: JobSource, queue_worker: Option<Arc<dyn Worker>>) -> Self {
        Self {
            source,
            max_retries: 0,
            notify_on_success: true,
            notify_on_failure: true,
            single_instance: true,
            queue_worker,
            retry: RetryConfig::default(),
            events_enabled: false,
            metadata: Map::new(),
        }
    }

    /// Derive a context from a job and the runner configuration.
    ///
    /// Retry budget comes from the job; backoff, notification switches and
    /// the events flag come from the runner.
    pub fn for_job(job: &Job, config: &RunnerConfig, queue_worker: Option<Arc<dyn Worker>>) -> Self {
        let base = match queue_worker {
            Some(worker) => Self::queue(worker),
            None => Self::cron(),
        };
        base.with_max_retries(job.max_retries())
            .with_retry(config.retry.clone())
            .with_notifications(config.notify_on_success, config.notify_on_failure)
            .with_events(config.events_enabled)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_notifications(mut self, on_success: bool, on_failure: bool) -> Self {
        self.notify_on_success = on_success;
        self.notify_on_failure = on_failure;
        self
    }

    pub fn with_single_instance(mut self, enabled: bool) -> Self {
        self.single_instance = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, enabled: bool) -> Self {
        self.events_enabled = enabled;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn source(&self) -> JobSource {
        self.source
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn notify_on_success(&self) -> bool {
        self.notify_on_success
    }

    pub fn notify_on_failure(&self) -> bool {
        self.notify_on_failure
    }

    pub fn single_instance(&self) -> bool {
        self.single_instance
    }

    pub fn queue_worker(&self) -> Option<&Arc<dyn Worker>> {
        self.queue_worker.as_ref()
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn events_enabled(&self) -> bool {
        self.events_enabled
    }

    pub fn metadata(&self) -> &Map<String, JsonValue> {
        &self.metadata
    }
}

impl core::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("source", &self.source)
            .field("max_retries", &self.max_retries)
            .field("notify_on_success", &self.notify_on_success)
            .field("notify_on_failure", &self.notify_on_failure)
            .field("single_instance", &self.single_instance)
            .field("queue_worker", &self.queue_worker.is_some())
            .field("retry", &self.retry)
            .field("events_enabled", &self.events_enabled)
            .field("metadata", &self.metadata)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronq_core::JobKind;
    use cronq_events::InMemoryQueue;
    use serde_json::json;

    #[test]
    fn for_job_takes_budget_from_job_and_policy_from_config() {
        let job = Job::new(JobKind::Shell, json!({"command": "ls"})).with_max_retries(4);
        let config = RunnerConfig {
            retry: RetryConfig::fixed(9),
            events_enabled: true,
            notify_on_success: false,
            ..RunnerConfig::default()
        };

        let ctx = ExecutionContext::for_job(&job, &config, None);
        assert_eq!(ctx.source(), JobSource::Cron);
        assert_eq!(ctx.max_retries(), 4);
        assert_eq!(ctx.retry().strategy, "fixed");
        assert!(ctx.events_enabled());
        assert!(!ctx.notify_on_success());
        assert!(ctx.queue_worker().is_none());
    }

    #[test]
    fn queue_context_carries_worker() {
        let worker: Arc<dyn Worker> = InMemoryQueue::arc("default");
        let ctx = ExecutionContext::queue(worker).with_metadata("queue", json!("default"));
        assert_eq!(ctx.source(), JobSource::Queue);
        assert!(ctx.queue_worker().is_some());
        assert_eq!(ctx.metadata()["queue"], "default");
    }
}
