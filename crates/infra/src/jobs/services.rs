//! Explicit service registry shared by every job component.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cronq_core::RunnerConfig;
use cronq_events::{EventBus, JobEvent};
use cronq_observability::{
    JobLogSink, Masker, MetricsCollector, NoopMetrics, Notifier, TracingLogSink, TracingNotifier,
};

use super::dead_letter::DeadLetterQueue;
use super::handler::HandlerRegistry;
use super::lock::{InMemoryLockStore, LockStore};

/// Blocking suspension used between retries and between cron jobs.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

/// Records requested sleeps instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn slept_secs(&self) -> Vec<u64> {
        self.slept().iter().map(Duration::as_secs).collect()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}

/// Collaborators and configuration, built once at process start and passed
/// by `Arc` into the scheduler, executor, coordinator and runners.
pub struct JobServices {
    config: RunnerConfig,
    registry: HandlerRegistry,
    log_sink: Arc<dyn JobLogSink>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<dyn MetricsCollector>,
    lock_store: Arc<dyn LockStore>,
    sleeper: Arc<dyn Sleeper>,
    bus: Option<Arc<dyn EventBus<JobEvent>>>,
    dead_letters: Option<Arc<dyn DeadLetterQueue>>,
    masker: Masker,
}

impl JobServices {
    pub fn builder(config: RunnerConfig) -> JobServicesBuilder {
        JobServicesBuilder::new(config)
    }

    /// Defaults everywhere, configuration from `CRONQ_*` variables.
    pub fn from_env() -> Arc<Self> {
        Self::builder(RunnerConfig::from_env()).build()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn log_sink(&self) -> &dyn JobLogSink {
        self.log_sink.as_ref()
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    pub fn metrics(&self) -> &dyn MetricsCollector {
        self.metrics.as_ref()
    }

    /// Shared handle, for components that outlive a borrow of the services.
    pub fn metrics_handle(&self) -> Arc<dyn MetricsCollector> {
        self.metrics.clone()
    }

    pub fn lock_store(&self) -> &Arc<dyn LockStore> {
        &self.lock_store
    }

    pub fn sleeper(&self) -> &dyn Sleeper {
        self.sleeper.as_ref()
    }

    pub fn bus(&self) -> Option<&Arc<dyn EventBus<JobEvent>>> {
        self.bus.as_ref()
    }

    pub fn dead_letters(&self) -> Option<&Arc<dyn DeadLetterQueue>> {
        self.dead_letters.as_ref()
    }

    pub fn masker(&self) -> &Masker {
        &self.masker
    }
}

impl core::fmt::Debug for JobServices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobServices")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("bus", &self.bus.is_some())
            .field("dead_letters", &self.dead_letters.is_some())
            .finish_non_exhaustive()
    }
}

pub struct JobServicesBuilder {
    config: RunnerConfig,
    registry: Option<HandlerRegistry>,
    log_sink: Arc<dyn JobLogSink>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<dyn MetricsCollector>,
    lock_store: Arc<dyn LockStore>,
    sleeper: Arc<dyn Sleeper>,
    bus: Option<Arc<dyn EventBus<JobEvent>>>,
    dead_letters: Option<Arc<dyn DeadLetterQueue>>,
}

impl JobServicesBuilder {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            registry: None,
            log_sink: Arc::new(TracingLogSink),
            notifier: Arc::new(TracingNotifier),
            metrics: Arc::new(NoopMetrics),
            lock_store: Arc::new(InMemoryLockStore::new()),
            sleeper: Arc::new(ThreadSleeper),
            bus: None,
            dead_letters: None,
        }
    }

    /// Replace the default registry (built-ins wired to the configured bus).
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn log_sink(mut self, sink: Arc<dyn JobLogSink>) -> Self {
        self.log_sink = sink;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn lock_store(mut self, store: Arc<dyn LockStore>) -> Self {
        self.lock_store = store;
        self
    }

    pub fn sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn bus(mut self, bus: Arc<dyn EventBus<JobEvent>>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn dead_letters(mut self, queue: Arc<dyn DeadLetterQueue>) -> Self {
        self.dead_letters = Some(queue);
        self
    }

    pub fn build(self) -> Arc<JobServices> {
        let masker = Masker::new(self.config.mask_secrets.iter().cloned())
            .with_max_bytes(self.config.max_output_bytes);
        let registry = self
            .registry
            .unwrap_or_else(|| HandlerRegistry::with_defaults(self.bus.clone()));

        Arc::new(JobServices {
            config: self.config,
            registry,
            log_sink: self.log_sink,
            notifier: self.notifier,
            metrics: self.metrics,
            lock_store: self.lock_store,
            sleeper: self.sleeper,
            bus: self.bus,
            dead_letters: self.dead_letters,
            masker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronq_core::{Job, JobKind};
    use cronq_events::InMemoryEventBus;
    use serde_json::json;

    #[test]
    fn default_registry_follows_configured_bus() {
        let without = JobServices::builder(RunnerConfig::default()).build();
        let event = Job::new(JobKind::Event, json!({"event": "x"}));
        assert!(without.registry().resolve(&event).is_err());

        let with = JobServices::builder(RunnerConfig::default())
            .bus(Arc::new(InMemoryEventBus::<JobEvent>::new()))
            .build();
        assert!(with.registry().resolve(&event).is_ok());
    }

    #[test]
    fn masker_uses_configured_secrets() {
        let config = RunnerConfig {
            mask_secrets: vec!["s3cret".to_string()],
            ..RunnerConfig::default()
        };
        let services = JobServices::builder(config).build();
        assert_eq!(services.masker().mask("pw s3cret"), "pw ********");
    }

    #[test]
    fn recording_sleeper_does_not_block() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_secs(3600));
        assert_eq!(sleeper.slept_secs(), vec![3600]);
    }
}
