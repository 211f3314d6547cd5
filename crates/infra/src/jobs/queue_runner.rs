//! Queue-consuming loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use cronq_core::{AttemptRecord, Job, JobError, LifecycleOutcome, RunnerConfig};
use cronq_events::{JobEnvelope, Worker};

use super::context::{ExecutionContext, JobSource};
use super::coordinator::JobLifecycleCoordinator;
use super::dead_letter::DeadLetterEntry;
use super::requeue::RequeueHelper;
use super::services::JobServices;

/// Who finalizes a reserved message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizeMode {
    /// Full retry loop in-process, backend finalized once at the end.
    #[default]
    Lifecycle,
    /// One attempt per dispatch; the backend re-dispatches on failure.
    SingleAttempt,
}

#[derive(Debug, Clone)]
pub struct QueueRunnerConfig {
    /// Thread name and log field.
    pub name: String,
    pub queue: String,
    /// Sleep when the queue is empty or the backend errored.
    pub poll_interval: Duration,
    /// Stop after this many messages (`None` = until stopped).
    pub max_jobs: Option<u64>,
    /// Dead-letter a message once it has been dispatched this many times.
    pub max_dispatches: Option<u32>,
    pub mode: FinalizeMode,
}

impl QueueRunnerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            name: "queue-runner".to_string(),
            queue: queue.into(),
            poll_interval: Duration::from_secs(1),
            max_jobs: None,
            max_dispatches: None,
            mode: FinalizeMode::default(),
        }
    }

    /// Consume the runner's default queue.
    pub fn from_runner(config: &RunnerConfig) -> Self {
        Self::new(config.default_queue.clone())
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_jobs(mut self, max: u64) -> Self {
        self.max_jobs = Some(max);
        self
    }

    pub fn with_max_dispatches(mut self, max: u32) -> Self {
        self.max_dispatches = Some(max);
        self
    }

    pub fn with_mode(mut self, mode: FinalizeMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Queue runner statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueRunnerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub requeued: u64,
    pub rejected: u64,
    pub dead_lettered: u64,
    pub already_running: u64,
    pub uptime_secs: u64,
}

/// What happened to one reserved message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// The job ran to a terminal state.
    Completed(LifecycleOutcome),
    /// The message could not become a runnable job and was dropped.
    Rejected { id: String, reason: String },
    /// The message hit `max_dispatches` and was moved to the dead-letter queue.
    DeadLettered { id: String },
    /// A single-instance job was in flight elsewhere; the message was handed
    /// back to the backend.
    AlreadyRunning { name: String },
}

/// Reserves messages from one queue and drives them to completion.
pub struct QueueRunner {
    services: Arc<JobServices>,
    worker: Arc<dyn Worker>,
    config: QueueRunnerConfig,
    coordinator: JobLifecycleCoordinator,
    requeue: RequeueHelper,
    stats: Arc<Mutex<QueueRunnerStats>>,
}

impl QueueRunner {
    pub fn new(services: Arc<JobServices>, worker: Arc<dyn Worker>, config: QueueRunnerConfig) -> Self {
        Self {
            coordinator: JobLifecycleCoordinator::new(services.clone()),
            requeue: RequeueHelper::new(services.metrics_handle()),
            services,
            worker,
            config,
            stats: Arc::new(Mutex::new(QueueRunnerStats::default())),
        }
    }

    pub fn config(&self) -> &QueueRunnerConfig {
        &self.config
    }

    pub fn stats(&self) -> QueueRunnerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Reserve and process at most one message.
    ///
    /// `Ok(None)` when nothing was available. Backend and lock-store
    /// failures are returned as errors; the message is released back to the
    /// backend first, without counting as a dispatch.
    pub fn run_once(&self) -> Result<Option<Dispatch>, JobError> {
        let Some(envelope) = self.worker.watch(&self.config.queue)? else {
            return Ok(None);
        };
        debug!(runner = %self.config.name, id = envelope.id(), attempts = envelope.attempts(), "reserved message");

        let mut job = match self.prepare(&envelope) {
            Ok(job) => job,
            Err(e) => {
                let reason = e.to_string();
                warn!(runner = %self.config.name, id = envelope.id(), error = %reason, "rejecting message");
                self.worker.reject(&envelope, &reason)?;
                self.record(|s| s.rejected += 1);
                return Ok(Some(Dispatch::Rejected {
                    id: envelope.id().to_string(),
                    reason,
                }));
            }
        };

        let result = if self
            .config
            .max_dispatches
            .is_some_and(|max| envelope.attempts() >= max)
        {
            self.dead_letter(&job, &envelope)
        } else {
            let ctx = ExecutionContext::for_job(&job, self.services.config(), Some(self.worker.clone()))
                .with_metadata("queue", json!(envelope.queue()))
                .with_metadata("message_id", json!(envelope.id()))
                .with_metadata("backend", json!(envelope.backend()));

            match self.config.mode {
                FinalizeMode::Lifecycle => self.run_lifecycle(&mut job, &ctx),
                FinalizeMode::SingleAttempt => self.run_single(&mut job, &envelope, &ctx),
            }
        };

        match result {
            Ok(dispatch) => Ok(Some(dispatch)),
            Err(JobError::AlreadyRunning { name }) => {
                self.worker.release(&job)?;
                self.record(|s| s.already_running += 1);
                Ok(Some(Dispatch::AlreadyRunning { name }))
            }
            Err(e) => {
                match self.worker.release(&job) {
                    Ok(found) => debug!(runner = %self.config.name, id = envelope.id(), found, "message released after error"),
                    Err(release) => warn!(
                        runner = %self.config.name,
                        id = envelope.id(),
                        error = %release,
                        "failed to release message after error"
                    ),
                }
                Err(e)
            }
        }
    }

    /// Process messages until `stop` is set or `max_jobs` is reached.
    pub fn run(&self, stop: &AtomicBool) -> QueueRunnerStats {
        info!(runner = %self.config.name, queue = %self.config.queue, mode = ?self.config.mode, "queue runner started");
        let started = Instant::now();
        let mut handled: u64 = 0;

        while !stop.load(Ordering::SeqCst) {
            if self.config.max_jobs.is_some_and(|max| handled >= max) {
                break;
            }
            match self.run_once() {
                Ok(Some(Dispatch::AlreadyRunning { .. })) => {
                    handled += 1;
                    // Give the lock holder time before the message comes back.
                    self.services.sleeper().sleep(self.config.poll_interval);
                }
                Ok(Some(_)) => handled += 1,
                Ok(None) => self.services.sleeper().sleep(self.config.poll_interval),
                Err(e) => {
                    error!(runner = %self.config.name, error = %e, "queue runner iteration failed");
                    self.services.sleeper().sleep(self.config.poll_interval);
                }
            }
            self.record(|s| s.uptime_secs = started.elapsed().as_secs());
        }

        info!(runner = %self.config.name, handled, "queue runner stopped");
        self.stats()
    }

    /// Run on a dedicated thread until the handle is shut down.
    pub fn spawn(self) -> Result<QueueRunnerHandle, JobError> {
        let stop = Arc::new(AtomicBool::new(false));
        let stats = self.stats.clone();
        let flag = stop.clone();

        let join = thread::Builder::new()
            .name(self.config.name.clone())
            .spawn(move || {
                self.run(&flag);
            })
            .map_err(|e| JobError::backend(format!("failed to spawn queue runner: {e}")))?;

        Ok(QueueRunnerHandle {
            stop,
            join: Some(join),
            stats,
        })
    }

    /// Envelope → runnable job, or the reason it can never run.
    fn prepare(&self, envelope: &JobEnvelope) -> Result<Job, JobError> {
        let job = envelope.to_job()?;
        self.services.registry().resolve(&job)?;
        Ok(job)
    }

    fn run_lifecycle(&self, job: &mut Job, ctx: &ExecutionContext) -> Result<Dispatch, JobError> {
        let outcome = self.coordinator.run(job, ctx)?;
        let success = outcome.result().is_success();
        let requeued = outcome.is_requeued();
        self.record(|s| {
            s.processed += 1;
            if success {
                s.succeeded += 1;
            } else {
                s.failed += 1;
            }
            if requeued {
                s.requeued += 1;
            }
        });
        Ok(Dispatch::Completed(outcome))
    }

    fn run_single(
        &self,
        job: &mut Job,
        envelope: &JobEnvelope,
        ctx: &ExecutionContext,
    ) -> Result<Dispatch, JobError> {
        let guard = self.coordinator.acquire_instance(job, ctx)?;
        let attempt = job.attempts().saturating_add(1);
        let result = self.coordinator.executor().execute(job, ctx)?;
        let success = result.is_success();

        let worker = self.worker.clone();
        self.requeue
            .finalize(job, envelope, |j, recreate| worker.remove_job(j, recreate), success)?;
        drop(guard);

        self.record(|s| {
            s.processed += 1;
            if success {
                s.succeeded += 1;
            } else {
                s.failed += 1;
                s.requeued += 1;
            }
        });

        let telemetry = vec![AttemptRecord::from_result(attempt, 0, &result)];
        Ok(Dispatch::Completed(LifecycleOutcome::new(
            result, !success, !success, telemetry,
        )))
    }

    /// Store first, then ack, so a failed store leaves the message with the backend.
    fn dead_letter(&self, job: &Job, envelope: &JobEnvelope) -> Result<Dispatch, JobError> {
        let attempts = envelope.attempts();
        warn!(
            runner = %self.config.name,
            id = envelope.id(),
            attempts,
            "dispatch limit reached, dead-lettering"
        );
        match self.services.dead_letters() {
            Some(dlq) => dlq.push(DeadLetterEntry::new(
                job.clone(),
                JobSource::Queue,
                attempts,
                "dispatch limit reached",
            ))?,
            None => warn!(runner = %self.config.name, id = envelope.id(), "no dead-letter queue configured, dropping"),
        }
        self.worker.remove_job(job, false)?;
        self.record(|s| s.dead_lettered += 1);
        Ok(Dispatch::DeadLettered {
            id: envelope.id().to_string(),
        })
    }

    fn record(&self, update: impl FnOnce(&mut QueueRunnerStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }
}

impl core::fmt::Debug for QueueRunner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueueRunner")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Handle to control a spawned queue runner.
#[derive(Debug)]
pub struct QueueRunnerHandle {
    stop: Arc<AtomicBool>,
    join: Option<thread::JoinHandle<()>>,
    stats: Arc<Mutex<QueueRunnerStats>>,
}

impl QueueRunnerHandle {
    /// Request shutdown and wait for the current message to finish.
    pub fn shutdown(mut self) -> QueueRunnerStats {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!("queue runner thread panicked");
            }
        }
        self.stats()
    }

    pub fn stats(&self) -> QueueRunnerStats {
        self.stats.lock().map(|s| s.clone()).unwrap_or_default()
    }
}
