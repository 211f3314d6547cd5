//! Single-attempt queue finalization.

use std::sync::Arc;

use tracing::{debug, info};

use cronq_core::{Job, JobError};
use cronq_events::{JobEnvelope, WorkerError};
use cronq_observability::MetricsCollector;

pub const QUEUE_SUCCEEDED_TOTAL: &str = "cronq_queue_succeeded_total";
pub const QUEUE_FAILED_TOTAL: &str = "cronq_queue_failed_total";
pub const QUEUE_REQUEUED_TOTAL: &str = "cronq_queue_requeued_total";

/// Acks or nacks a queue message after exactly one attempt.
///
/// Used by the queue runner's `FinalizeMode::SingleAttempt`. In that mode
/// the backend's re-dispatch is the retry loop; the lifecycle coordinator's
/// own retry budget is not involved.
#[derive(Clone)]
pub struct RequeueHelper {
    metrics: Arc<dyn MetricsCollector>,
}

impl RequeueHelper {
    pub fn new(metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { metrics }
    }

    /// Success: `remove(job, false)`. Failure: bump the job's attempt
    /// counter, then `remove(job, true)`.
    ///
    /// Returns whatever `remove` reported.
    pub fn finalize<F>(
        &self,
        job: &mut Job,
        envelope: &JobEnvelope,
        remove: F,
        success: bool,
    ) -> Result<bool, JobError>
    where
        F: FnOnce(&Job, bool) -> Result<bool, WorkerError>,
    {
        let labels = [("queue", envelope.queue()), ("backend", envelope.backend())];

        if success {
            let found = remove(job, false)?;
            self.metrics.increment(QUEUE_SUCCEEDED_TOTAL, 1, &labels);
            debug!(id = envelope.id(), queue = envelope.queue(), found, "message acknowledged");
            return Ok(found);
        }

        let attempts = job.increment_attempts();
        let found = remove(job, true)?;
        self.metrics.increment(QUEUE_FAILED_TOTAL, 1, &labels);
        self.metrics.increment(QUEUE_REQUEUED_TOTAL, 1, &labels);
        info!(
            id = envelope.id(),
            queue = envelope.queue(),
            attempts,
            found,
            "message requeued"
        );
        Ok(found)
    }
}

impl core::fmt::Debug for RequeueHelper {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RequeueHelper").finish_non_exhaustive()
    }
}
