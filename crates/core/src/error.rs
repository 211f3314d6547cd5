//! Job error model.

use thiserror::Error;

/// Result type used across the job layer.
pub type JobResult<T> = Result<T, JobError>;

/// Job-level error.
///
/// Configuration and graph errors (`InvalidJob`, `MissingDependency`,
/// `CircularDependency`) are fatal for the caller. `Execution` failures are
/// recovered locally by the lifecycle coordinator up to the retry budget and
/// only surface here when a caller asks for them explicitly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Unregistered or non-conforming job kind/payload. Never retried.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// A `depends_on` entry names a job that is not registered.
    #[error("job `{job}` depends on unknown job `{dependency}`")]
    MissingDependency { job: String, dependency: String },

    /// The dependency graph contains at least one cycle.
    #[error("circular dependency between jobs: {}", jobs.join(", "))]
    CircularDependency { jobs: Vec<String> },

    /// A single-instance job is already in flight.
    #[error("job `{name}` is already running")]
    AlreadyRunning { name: String },

    /// Malformed envelope or payload. The triggering message must not be
    /// retried as-is.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The handler threw or reported failure.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The single-instance lock store could not be reached.
    #[error("lock store error: {0}")]
    Lock(String),

    /// A queue backend call failed.
    #[error("queue backend error: {0}")]
    Backend(String),

    /// A job could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl JobError {
    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution(msg.into())
    }

    pub fn lock(msg: impl Into<String>) -> Self {
        Self::Lock(msg.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn already_running(name: impl Into<String>) -> Self {
        Self::AlreadyRunning { name: name.into() }
    }

    /// Errors that abort a whole scheduler pass rather than a single job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            JobError::InvalidJob(_)
                | JobError::MissingDependency { .. }
                | JobError::CircularDependency { .. }
        )
    }
}

impl From<serde_json::Error> for JobError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value.to_string())
    }
}
