//! Cron-triggered pass over the scheduler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use cronq_core::{Job, JobError, Schedulable};

use super::context::ExecutionContext;
use super::coordinator::JobLifecycleCoordinator;
use super::scheduler::Scheduler;
use super::services::JobServices;

/// External "is this job due at time T" oracle.
pub trait DueOracle: Send + Sync {
    fn is_due(&self, job: &Job, now: DateTime<Utc>) -> bool;
}

/// Every job runs on every pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysDue;

impl DueOracle for AlwaysDue {
    fn is_due(&self, _job: &Job, _now: DateTime<Utc>) -> bool {
        true
    }
}

/// Due when the job has no schedule timestamp or it has passed.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScheduleTimestampDue;

impl DueOracle for ScheduleTimestampDue {
    fn is_due(&self, job: &Job, now: DateTime<Utc>) -> bool {
        job.is_due(now)
    }
}

/// Summary of one job within a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRunSummary {
    pub name: String,
    pub attempts: u32,
    pub success: bool,
    pub error: Option<String>,
}

/// Result of `CronRunner::run_pass`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ran: Vec<JobRunSummary>,
    /// Not due at the pass time.
    pub skipped: Vec<String>,
    /// Single-instance jobs already in flight elsewhere.
    pub already_running: Vec<String>,
}

impl PassReport {
    pub fn succeeded(&self) -> usize {
        self.ran.iter().filter(|r| r.success).count()
    }

    pub fn failed(&self) -> usize {
        self.ran.iter().filter(|r| !r.success).count()
    }
}

/// Runs every due job once per pass, in dependency order.
pub struct CronRunner {
    services: Arc<JobServices>,
    coordinator: JobLifecycleCoordinator,
    oracle: Box<dyn DueOracle>,
}

impl CronRunner {
    pub fn new(services: Arc<JobServices>) -> Self {
        Self {
            coordinator: JobLifecycleCoordinator::new(services.clone()),
            services,
            oracle: Box::new(AlwaysDue),
        }
    }

    pub fn with_oracle(mut self, oracle: impl DueOracle + 'static) -> Self {
        self.oracle = Box::new(oracle);
        self
    }

    /// One pass at time `now`.
    ///
    /// Graph errors abort the pass before anything runs. The configured
    /// inter-job delay separates consecutive jobs.
    pub fn run_pass(&self, scheduler: &Scheduler, now: DateTime<Utc>) -> Result<PassReport, JobError> {
        let started_at = Utc::now();
        let order = scheduler.execution_order()?;
        let config = self.services.config();

        let mut report = PassReport {
            started_at,
            finished_at: started_at,
            ran: Vec::new(),
            skipped: Vec::new(),
            already_running: Vec::new(),
        };

        let mut first = true;
        for mut job in order {
            if !self.oracle.is_due(&job, now) {
                report.skipped.push(job.name());
                continue;
            }
            if !first {
                self.services.sleeper().sleep(config.inter_job_delay());
            }
            first = false;

            let ctx = ExecutionContext::for_job(&job, config, None);
            match self.coordinator.run(&mut job, &ctx) {
                Ok(outcome) => report.ran.push(JobRunSummary {
                    name: job.name(),
                    attempts: outcome.attempts(),
                    success: outcome.result().is_success(),
                    error: outcome.result().error().map(str::to_owned),
                }),
                Err(JobError::AlreadyRunning { name }) => {
                    warn!(job = %name, "skipping job still running from an earlier pass");
                    report.already_running.push(name);
                }
                Err(e) => return Err(e),
            }
        }

        report.finished_at = Utc::now();
        info!(
            ran = report.ran.len(),
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped.len(),
            "cron pass finished"
        );
        Ok(report)
    }
}

impl core::fmt::Debug for CronRunner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CronRunner")
            .field("services", &self.services)
            .finish_non_exhaustive()
    }
}
