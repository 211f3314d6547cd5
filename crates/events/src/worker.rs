//! Queue backend contracts.
//!
//! Concrete transports (key-value store, relational store, broker, HTTP bus)
//! implement these traits outside the lifecycle engine; the engine only ever
//! sees `JobEnvelope`s and `Job`s.

use serde_json::Value as JsonValue;
use thiserror::Error;

use cronq_core::{Job, JobError};

use crate::envelope::JobEnvelope;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("unknown reservation: {0}")]
    UnknownReservation(String),
    #[error("backend lock poisoned")]
    Poisoned,
    #[error("invalid message: {0}")]
    Invalid(String),
}

impl From<WorkerError> for JobError {
    fn from(value: WorkerError) -> Self {
        match value {
            WorkerError::Invalid(msg) => JobError::Validation(msg),
            other => JobError::Backend(other.to_string()),
        }
    }
}

/// Consuming side of a queue backend.
///
/// The backend enforces at-most-one reservation per message; this crate does
/// not coordinate between competing workers.
pub trait Worker: Send + Sync {
    /// Reserve the next available message on `queue`, if any.
    fn watch(&self, queue: &str) -> Result<Option<JobEnvelope>, WorkerError>;

    /// Finalize the reservation `job` was built from.
    ///
    /// `recreate = false` acknowledges (removes) the message; `recreate = true`
    /// asks the backend to re-dispatch it. Returns whether the backend found
    /// and finalized the reservation.
    fn remove_job(&self, job: &Job, recreate: bool) -> Result<bool, WorkerError>;

    /// Hand a reservation back without counting it as a dispatch.
    ///
    /// Used when the job never started (its lock was held, or the runner hit
    /// an infrastructure error first). Backends that cannot tell the two apart
    /// fall back to a plain re-dispatch.
    fn release(&self, job: &Job) -> Result<bool, WorkerError> {
        self.remove_job(job, true)
    }

    /// Drop a message that could not be turned into a job. It must not be
    /// re-dispatched as-is.
    fn reject(&self, envelope: &JobEnvelope, reason: &str) -> Result<bool, WorkerError>;
}

/// Producing side of a queue backend.
pub trait Queue: Send + Sync {
    /// Enqueue a raw data object; returns the backend message id.
    fn enqueue(&self, data: JsonValue) -> Result<String, WorkerError>;

    /// Enqueue a job in its serialized form.
    fn enqueue_job(&self, job: &Job) -> Result<String, WorkerError> {
        let data = job
            .to_json()
            .map_err(|e| WorkerError::Invalid(e.to_string()))?;
        self.enqueue(data)
    }
}
