//! Multi-attempt lifecycle: locking, retries, backoff, completion.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value as JsonValue, json};
use tracing::{error, info, warn};

use cronq_core::{AttemptRecord, ExecutionResult, Job, JobError, LifecycleOutcome, Notifiable};
use cronq_events::{EventBus, JobEvent};

use super::completion::completion_for;
use super::context::{ExecutionContext, JobSource};
use super::dead_letter::DeadLetterEntry;
use super::executor::JobExecutor;
use super::lock::InstanceGuard;
use super::retry::policy_from_config;
use super::services::JobServices;

pub const ATTEMPTS_TOTAL: &str = "cronq_attempts_total";
pub const JOBS_SUCCEEDED_TOTAL: &str = "cronq_jobs_succeeded_total";
pub const JOBS_FAILED_TOTAL: &str = "cronq_jobs_failed_total";
pub const RETRIES_TOTAL: &str = "cronq_retries_total";
pub const ATTEMPT_DURATION_SECONDS: &str = "cronq_attempt_duration_seconds";

/// Drives a job through up to `max_retries + 1` attempts.
///
/// State machine: `Idle -> Attempting -> {Success | RetryWait -> Attempting | FinalFailure}`.
/// Backoff is a blocking sleep on the calling thread.
#[derive(Debug, Clone)]
pub struct JobLifecycleCoordinator {
    services: Arc<JobServices>,
    executor: JobExecutor,
}

impl JobLifecycleCoordinator {
    pub fn new(services: Arc<JobServices>) -> Self {
        Self {
            executor: JobExecutor::new(services.clone()),
            services,
        }
    }

    pub fn executor(&self) -> &JobExecutor {
        &self.executor
    }

    /// Run `job` to a terminal state.
    ///
    /// Errors: `InvalidJob` if no handler can run it, `AlreadyRunning` if a
    /// single-instance job is in flight elsewhere (no attempt is made), and
    /// `Lock` if the lock store is unreachable. Handler failures are never
    /// errors; they end up in the outcome.
    pub fn run(&self, job: &mut Job, ctx: &ExecutionContext) -> Result<LifecycleOutcome, JobError> {
        let name = job.name();
        self.services.registry().resolve(job)?;
        let guard = self.acquire_instance(job, ctx)?;

        job.set_running(true);
        let outcome = self.drive(job, ctx, &name);
        job.set_running(false);
        drop(guard);
        outcome
    }

    /// Take the single-instance lock when both `ctx` and `job` ask for it.
    ///
    /// `Ok(None)` means no lock was needed. A lock held elsewhere is
    /// `AlreadyRunning`; hold the returned guard for the whole run.
    pub fn acquire_instance(&self, job: &Job, ctx: &ExecutionContext) -> Result<Option<InstanceGuard>, JobError> {
        if !(ctx.single_instance() && job.is_single_instance()) {
            return Ok(None);
        }
        let name = job.name();
        let store = self.services.lock_store().clone();
        match InstanceGuard::acquire(store, name.clone(), self.services.config().lock_ttl())? {
            Some(guard) => Ok(Some(guard)),
            None => {
                warn!(job = %name, source = %ctx.source(), "job already running, skipping");
                Err(JobError::already_running(name))
            }
        }
    }

    fn drive(&self, job: &mut Job, ctx: &ExecutionContext, name: &str) -> Result<LifecycleOutcome, JobError> {
        let policy = policy_from_config(ctx.retry());
        let completion = completion_for(ctx.source());
        let source = ctx.source().as_str();
        let labels = [("job", name), ("source", source)];
        let metrics = self.services.metrics();

        self.publish(ctx, "job.started", name, json!({ "source": source }));

        let mut telemetry = Vec::new();
        let mut attempt: u32 = 1;
        let mut delay: u64 = 0;
        loop {
            let result = self.executor.attempt(job, ctx, attempt)?;
            job.increment_attempts();

            metrics.increment(ATTEMPTS_TOTAL, 1, &labels);
            metrics.observe(ATTEMPT_DURATION_SECONDS, result.duration().as_secs_f64(), &labels);
            telemetry.push(AttemptRecord::from_result(attempt, delay, &result));
            self.maybe_notify(job, ctx, attempt, &result);

            if result.is_success() {
                if let Err(e) = completion.on_success(job, &result, ctx) {
                    error!(job = %name, source, error = %e, "completion failed after success");
                }
                metrics.increment(JOBS_SUCCEEDED_TOTAL, 1, &labels);
                info!(job = %name, source, attempts = attempt, "job succeeded");
                self.publish(ctx, "job.succeeded", name, json!({ "attempts": attempt }));
                return Ok(LifecycleOutcome::new(result, false, false, telemetry));
            }

            if attempt > ctx.max_retries() {
                let requeued = match completion.on_failure(job, &result, ctx, attempt) {
                    Ok(found) => ctx.source() == JobSource::Queue && found,
                    Err(e) => {
                        error!(job = %name, source, error = %e, "completion failed after final failure");
                        false
                    }
                };
                metrics.increment(JOBS_FAILED_TOTAL, 1, &labels);
                error!(
                    job = %name,
                    source,
                    attempts = attempt,
                    error = result.error().unwrap_or(""),
                    "job failed permanently"
                );
                self.publish(
                    ctx,
                    "job.failed",
                    name,
                    json!({ "attempts": attempt, "error": result.error() }),
                );
                if ctx.source() == JobSource::Cron {
                    self.dead_letter(job, attempt, &result);
                }
                return Ok(LifecycleOutcome::new(result, true, requeued, telemetry));
            }

            delay = policy.compute_delay(attempt + 1);
            metrics.increment(RETRIES_TOTAL, 1, &labels);
            warn!(
                job = %name,
                source,
                attempt,
                delay_secs = delay,
                error = result.error().unwrap_or(""),
                "attempt failed, retrying"
            );
            self.publish(
                ctx,
                "job.retrying",
                name,
                json!({ "attempt": attempt, "delay_secs": delay }),
            );
            if delay > 0 {
                self.services.sleeper().sleep(Duration::from_secs(delay));
            }
            attempt += 1;
        }
    }

    fn maybe_notify(&self, job: &Job, ctx: &ExecutionContext, attempt: u32, result: &ExecutionResult) {
        let success = result.is_success();
        let ctx_wants = if success {
            ctx.notify_on_success()
        } else {
            ctx.notify_on_failure()
        };
        if ctx_wants && job.wants_notification(success) {
            self.executor.notify(job, attempt, result);
        }
    }

    fn publish(&self, ctx: &ExecutionContext, event: &str, name: &str, data: JsonValue) {
        if !ctx.events_enabled() {
            return;
        }
        let Some(bus) = self.services.bus() else {
            return;
        };
        if let Err(e) = bus.publish(JobEvent::new(event, data).for_job(name)) {
            warn!(job = name, event, error = %e, "failed to publish lifecycle event");
        }
    }

    fn dead_letter(&self, job: &Job, attempts: u32, result: &ExecutionResult) {
        let Some(dlq) = self.services.dead_letters() else {
            return;
        };
        let reason = result.error().unwrap_or("failed").to_string();
        let entry = DeadLetterEntry::new(job.clone(), JobSource::Cron, attempts, reason);
        if let Err(e) = dlq.push(entry) {
            warn!(job = %job.name(), error = %e, "failed to dead-letter job");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::jobs::dead_letter::{DeadLetterQueue, InMemoryDeadLetterQueue};
    use crate::jobs::lock::LockStore;
    use crate::jobs::services::RecordingSleeper;
    use crate::jobs::test_support::{RecordingWorker, flaky};
    use cronq_core::{RetryConfig, RunnerConfig};
    use cronq_events::InMemoryEventBus;
    use cronq_observability::{InMemoryMetrics, InMemoryNotifier};

    struct Fixture {
        coordinator: JobLifecycleCoordinator,
        services: Arc<JobServices>,
        sleeper: Arc<RecordingSleeper>,
        metrics: Arc<InMemoryMetrics>,
        notifier: Arc<InMemoryNotifier>,
        dead_letters: Arc<InMemoryDeadLetterQueue>,
        bus: Arc<InMemoryEventBus<JobEvent>>,
    }

    fn fixture() -> Fixture {
        let sleeper = Arc::new(RecordingSleeper::new());
        let metrics = Arc::new(InMemoryMetrics::new());
        let notifier = Arc::new(InMemoryNotifier::new());
        let dead_letters = Arc::new(InMemoryDeadLetterQueue::new());
        let bus = Arc::new(InMemoryEventBus::<JobEvent>::new());
        let services = JobServices::builder(RunnerConfig::default())
            .sleeper(sleeper.clone())
            .metrics(metrics.clone())
            .notifier(notifier.clone())
            .dead_letters(dead_letters.clone())
            .bus(bus.clone())
            .build();
        Fixture {
            coordinator: JobLifecycleCoordinator::new(services.clone()),
            services,
            sleeper,
            metrics,
            notifier,
            dead_letters,
            bus,
        }
    }

    #[test]
    fn fails_k_times_then_succeeds() {
        let f = fixture();
        let mut job = flaky("flaky", 2).with_max_retries(3);
        let ctx = ExecutionContext::for_job(&job, f.services.config(), None)
            .with_retry(RetryConfig::exponential(2, 3.0, 50, false));

        let outcome = f.coordinator.run(&mut job, &ctx).unwrap();
        assert_eq!(outcome.attempts(), 3);
        assert!(!outcome.is_final_failure());
        assert!(outcome.result().is_success());
        assert_eq!(outcome.delays(), vec![2, 6]);
        assert_eq!(f.sleeper.slept_secs(), vec![2, 6]);
        assert_eq!(job.attempts(), 3);
        assert!(!job.is_running());

        assert_eq!(f.metrics.counter_total(ATTEMPTS_TOTAL), 3);
        assert_eq!(f.metrics.counter_total(RETRIES_TOTAL), 2);
        assert_eq!(f.metrics.counter_total(JOBS_SUCCEEDED_TOTAL), 1);
        assert_eq!(f.metrics.observations(ATTEMPT_DURATION_SECONDS).len(), 3);
    }

    #[test]
    fn always_failing_exhausts_budget() {
        let f = fixture();
        let mut job = flaky("doomed", u32::MAX).with_max_retries(2);
        let ctx = ExecutionContext::for_job(&job, f.services.config(), None);

        let outcome = f.coordinator.run(&mut job, &ctx).unwrap();
        assert_eq!(outcome.attempts(), 3);
        assert!(outcome.is_final_failure());
        assert!(!outcome.is_requeued());
        assert_eq!(f.metrics.counter_total(JOBS_FAILED_TOTAL), 1);
        // No backoff configured: nothing slept.
        assert!(f.sleeper.slept().is_empty());

        let dead = f.dead_letters.list(10).unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
        assert_eq!(dead[0].source, JobSource::Cron);
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let f = fixture();
        let mut job = flaky("once", u32::MAX);
        let ctx = ExecutionContext::for_job(&job, f.services.config(), None);

        let outcome = f.coordinator.run(&mut job, &ctx).unwrap();
        assert_eq!(outcome.attempts(), 1);
        assert!(outcome.is_final_failure());
    }

    #[test]
    fn already_running_consumes_no_attempt() {
        let f = fixture();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut job = Job::closure(json!("exclusive"), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        })
        .with_name("exclusive")
        .single_instance(true);

        assert!(f.services.lock_store().acquire("exclusive", "other-process", None).unwrap());
        let err = f.coordinator.run(&mut job, &ExecutionContext::cron()).unwrap_err();

        assert_eq!(err, JobError::already_running("exclusive"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(job.attempts(), 0);
        assert_eq!(f.metrics.counter_total(ATTEMPTS_TOTAL), 0);
    }

    #[test]
    fn lock_is_released_after_run() {
        let f = fixture();
        let mut job = flaky("exclusive", 0).single_instance(true);

        f.coordinator.run(&mut job, &ExecutionContext::cron()).unwrap();
        assert_eq!(f.services.lock_store().holder("exclusive").unwrap(), None);
        f.coordinator.run(&mut job, &ExecutionContext::cron()).unwrap();
    }

    #[test]
    fn single_instance_ignored_when_context_disables_it() {
        let f = fixture();
        let mut job = flaky("shared", 0).single_instance(true);
        f.services.lock_store().acquire("shared", "other", None).unwrap();

        let ctx = ExecutionContext::cron().with_single_instance(false);
        assert!(f.coordinator.run(&mut job, &ctx).is_ok());
    }

    #[test]
    fn queue_success_acks_once() {
        let f = fixture();
        let worker = Arc::new(RecordingWorker::default());
        let mut job = flaky("q", 1).with_max_retries(3);
        let ctx = ExecutionContext::for_job(&job, f.services.config(), Some(worker.clone()));

        let outcome = f.coordinator.run(&mut job, &ctx).unwrap();
        assert_eq!(outcome.attempts(), 2);
        assert_eq!(worker.removals(), vec![false]);
        assert!(f.dead_letters.is_empty());
    }

    #[test]
    fn queue_exhaustion_requeues_once() {
        let f = fixture();
        let worker = Arc::new(RecordingWorker::default());
        let mut job = flaky("q", u32::MAX).with_max_retries(2);
        let ctx = ExecutionContext::for_job(&job, f.services.config(), Some(worker.clone()));

        let outcome = f.coordinator.run(&mut job, &ctx).unwrap();
        assert!(outcome.is_final_failure());
        assert!(outcome.is_requeued());
        assert_eq!(worker.removals(), vec![true]);
        assert!(f.dead_letters.is_empty());
    }

    #[test]
    fn notification_needs_context_and_job_flags() {
        let f = fixture();
        let mut job = flaky("n", 1).notify_on(true, false);

        let ctx = ExecutionContext::cron().with_max_retries(1);
        f.coordinator.run(&mut job, &ctx).unwrap();
        let sent = f.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_success());
        assert_eq!(sent[0].attempt, 2);

        let mut job = flaky("n2", 0).notify_on(true, true);
        let ctx = ExecutionContext::cron().with_notifications(false, true);
        f.coordinator.run(&mut job, &ctx).unwrap();
        assert_eq!(f.notifier.sent().len(), 1);
    }

    #[test]
    fn lifecycle_events_published_when_enabled() {
        let f = fixture();
        let subscription = f.bus.subscribe();
        let mut job = flaky("evented", 1);

        let ctx = ExecutionContext::cron().with_max_retries(1).with_events(true);
        f.coordinator.run(&mut job, &ctx).unwrap();

        let names: Vec<String> = subscription.drain().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["job.started", "job.retrying", "job.succeeded"]);

        let ctx = ExecutionContext::cron();
        f.coordinator.run(&mut flaky("quiet", 0), &ctx).unwrap();
        assert!(subscription.drain().is_empty());
    }

    #[test]
    fn invalid_job_fails_before_any_attempt() {
        let f = fixture();
        let mut job = Job::new(cronq_core::JobKind::Command, json!({}));
        let err = f.coordinator.run(&mut job, &ExecutionContext::cron()).unwrap_err();
        assert!(matches!(err, JobError::InvalidJob(_)));
        assert_eq!(f.metrics.counter_total(ATTEMPTS_TOTAL), 0);
    }
}
