//! Single-attempt job executor.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use cronq_core::{ExecutionResult, Job, JobError, Notifiable};
use cronq_observability::{JobLogRecord, Notification};

use super::capture::{OutputSink, merge_output};
use super::context::ExecutionContext;
use super::handler::{Handler, HandlerError, HandlerOutput};
use super::services::JobServices;

/// Runs exactly one attempt of a job's handler.
///
/// Everything after handler resolution is caught into the returned
/// `ExecutionResult` (errors and panics alike). Only an unresolvable job
/// (`InvalidJob`) is returned as `Err`.
#[derive(Debug, Clone)]
pub struct JobExecutor {
    services: Arc<JobServices>,
}

impl JobExecutor {
    pub fn new(services: Arc<JobServices>) -> Self {
        Self { services }
    }

    pub fn services(&self) -> &Arc<JobServices> {
        &self.services
    }

    /// Run one attempt, log it, and notify per the job's flags.
    ///
    /// The attempt is numbered one past the job's attempt counter; the
    /// counter itself is left to the caller.
    pub fn execute(&self, job: &mut Job, ctx: &ExecutionContext) -> Result<ExecutionResult, JobError> {
        let attempt = job.attempts().saturating_add(1);
        let result = self.attempt(job, ctx, attempt)?;

        let wanted = if result.is_success() {
            ctx.notify_on_success()
        } else {
            ctx.notify_on_failure()
        };
        if wanted && job.wants_notification(result.is_success()) {
            self.notify(job, attempt, &result);
        }
        Ok(result)
    }

    /// Run one attempt and log it; notification is left to the caller.
    pub(crate) fn attempt(
        &self,
        job: &mut Job,
        ctx: &ExecutionContext,
        attempt: u32,
    ) -> Result<ExecutionResult, JobError> {
        let mut handler = self.services.registry().resolve(job)?;
        let handler_name = handler.name().to_string();
        debug!(job = %job.name(), attempt, handler = %handler_name, "running attempt");

        let started = Utc::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| invoke(handler.as_mut(), job)));
        let finished = Utc::now();

        let result = match outcome {
            Ok(Ok((output, captured))) if output.success => ExecutionResult::success(
                handler_name,
                merge_output(output.data, captured),
                started,
                finished,
            ),
            Ok(Ok((output, captured))) => ExecutionResult::failure(
                handler_name,
                failure_message(output.data),
                captured,
                started,
                finished,
            ),
            Ok(Err(e)) => ExecutionResult::failure(handler_name, e.to_string(), None, started, finished),
            Err(panic) => ExecutionResult::failure(
                handler_name,
                format!("handler panicked: {}", panic_message(panic.as_ref())),
                None,
                started,
                finished,
            ),
        };

        self.log(job, ctx, attempt, &result);
        Ok(result)
    }

    fn log(&self, job: &Job, ctx: &ExecutionContext, attempt: u32, result: &ExecutionResult) {
        let record = JobLogRecord::from_result(
            job.name(),
            attempt,
            ctx.source().as_str(),
            result,
            self.services.masker(),
        );
        if let Err(e) = self.services.log_sink().record(&record) {
            warn!(job = %record.name, error = %e, "job log sink failed");
        }
    }

    pub(crate) fn notify(&self, job: &Job, attempt: u32, result: &ExecutionResult) {
        let notification = Notification::new(job.name(), attempt, result.clone());
        if let Err(e) = self.services.notifier().notify(&notification) {
            warn!(job = %notification.job, error = %e, "job notification failed");
        }
    }
}

/// before_run → handle (with capture) → after_run.
///
/// The capture sink is dropped on any error, so a failed step never leaks
/// partial output into the result.
fn invoke(
    handler: &mut dyn Handler,
    job: &mut Job,
) -> Result<(HandlerOutput, Option<String>), HandlerError> {
    *job = handler.before_run(job.clone())?;

    let mut sink = OutputSink::new();
    let output = handler.handle(job, &mut sink)?;
    handler.after_run(job)?;
    Ok((output, sink.into_string()))
}

fn failure_message(data: Option<JsonValue>) -> String {
    match data {
        Some(JsonValue::String(s)) if !s.is_empty() => s,
        Some(JsonValue::Null) | None => "handler reported failure".to_string(),
        Some(other) => other.to_string(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
