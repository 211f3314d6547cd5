//! Terminal side effects of a finished attempt sequence.

use tracing::debug;

use cronq_core::{ExecutionResult, Job, JobError};

use super::context::{ExecutionContext, JobSource};

/// Reacts to the terminal state of a lifecycle run.
///
/// Both hooks return whether the backing store acknowledged the finalization
/// (`true` for strategies that have nothing to finalize).
pub trait CompletionStrategy: Send + Sync {
    fn on_success(
        &self,
        job: &Job,
        result: &ExecutionResult,
        ctx: &ExecutionContext,
    ) -> Result<bool, JobError>;

    fn on_failure(
        &self,
        job: &Job,
        result: &ExecutionResult,
        ctx: &ExecutionContext,
        attempt: u32,
    ) -> Result<bool, JobError>;
}

/// Cron-triggered runs have no terminal side effect.
#[derive(Debug, Default, Clone, Copy)]
pub struct CronCompletion;

impl CompletionStrategy for CronCompletion {
    fn on_success(&self, _: &Job, _: &ExecutionResult, _: &ExecutionContext) -> Result<bool, JobError> {
        Ok(true)
    }

    fn on_failure(
        &self,
        _: &Job,
        _: &ExecutionResult,
        _: &ExecutionContext,
        _: u32,
    ) -> Result<bool, JobError> {
        Ok(true)
    }
}

/// Acknowledges (success) or re-dispatches (failure) the queue reservation.
#[derive(Debug, Default, Clone, Copy)]
pub struct QueueCompletion;

impl QueueCompletion {
    fn finalize(&self, job: &Job, ctx: &ExecutionContext, recreate: bool) -> Result<bool, JobError> {
        let worker = ctx
            .queue_worker()
            .ok_or_else(|| JobError::validation("queue completion requires a queue worker"))?;
        let found = worker.remove_job(job, recreate)?;
        debug!(job = %job.name(), recreate, found, "queue reservation finalized");
        Ok(found)
    }
}

impl CompletionStrategy for QueueCompletion {
    fn on_success(&self, job: &Job, _: &ExecutionResult, ctx: &ExecutionContext) -> Result<bool, JobError> {
        self.finalize(job, ctx, false)
    }

    fn on_failure(
        &self,
        job: &Job,
        _: &ExecutionResult,
        ctx: &ExecutionContext,
        _attempt: u32,
    ) -> Result<bool, JobError> {
        self.finalize(job, ctx, true)
    }
}

/// Strategy for a run, chosen purely from its source.
pub fn completion_for(source: JobSource) -> &'static dyn CompletionStrategy {
    match source {
        JobSource::Cron => &CronCompletion,
        JobSource::Queue => &QueueCompletion,
    }
}
