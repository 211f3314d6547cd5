//! Handler contract and the kind → handler registry.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use cronq_core::{Job, JobError, JobKind};
use cronq_events::{EventBus, JobEvent};

use super::capture::OutputSink;
use super::handlers::{
    ClosureHandler, CommandHandler, EventHandler, ShellHandler, UrlHandler,
};

/// Failure raised from inside a handler. Caught by the executor and turned
/// into a failed attempt.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{0}")]
    Failed(String),
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("event bus error: {0}")]
    Bus(#[from] cronq_events::BusError),
    #[error("invalid payload: {0}")]
    Payload(String),
}

impl HandlerError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// What a handler reports back for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    pub success: bool,
    pub data: Option<JsonValue>,
}

impl HandlerOutput {
    pub fn ok(data: Option<JsonValue>) -> Self {
        Self { success: true, data }
    }

    pub fn failed(data: Option<JsonValue>) -> Self {
        Self { success: false, data }
    }
}

/// Executes one kind of job.
pub trait Handler: Send {
    /// Stable identity recorded on the result.
    fn name(&self) -> &str;

    /// May return a modified job for this attempt.
    fn before_run(&mut self, job: Job) -> Result<Job, HandlerError> {
        Ok(job)
    }

    /// Run the job. Incidental output goes to `out`.
    fn handle(&mut self, job: &Job, out: &mut OutputSink) -> Result<HandlerOutput, HandlerError>;

    fn after_run(&mut self, _job: &Job) -> Result<(), HandlerError> {
        Ok(())
    }
}

type HandlerFactory = Arc<dyn Fn(&Job) -> Result<Box<dyn Handler>, JobError> + Send + Sync>;

/// Maps each job kind to a handler factory.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<JobKind, HandlerFactory>,
}

impl HandlerRegistry {
    /// Empty registry: every kind is unregistered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a built-in handler for every kind. `Event` jobs need a
    /// bus; without one they fail at resolution time.
    pub fn with_defaults(bus: Option<Arc<dyn EventBus<JobEvent>>>) -> Self {
        let mut registry = Self::new();
        registry.register(JobKind::Command, |_| Ok(Box::new(CommandHandler)));
        registry.register(JobKind::Shell, |_| Ok(Box::new(ShellHandler)));
        registry.register(JobKind::Closure, |job| {
            let closure = job
                .closure_fn()
                .cloned()
                .ok_or_else(|| JobError::invalid_job("closure job carries no closure"))?;
            Ok(Box::new(ClosureHandler::new(closure)))
        });
        registry.register(JobKind::Url, |_| Ok(Box::new(UrlHandler)));
        registry.register(JobKind::Event, move |_| match &bus {
            Some(bus) => Ok(Box::new(EventHandler::new(bus.clone()))),
            None => Err(JobError::invalid_job("event jobs require an event bus")),
        });
        registry
    }

    /// Register (or replace) the handler for `kind`.
    pub fn register<F>(&mut self, kind: JobKind, factory: F)
    where
        F: Fn(&Job) -> Result<Box<dyn Handler>, JobError> + Send + Sync + 'static,
    {
        self.factories.insert(kind, Arc::new(factory));
    }

    pub fn is_registered(&self, kind: JobKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Check that `job` could be executed: kind registered, payload conforms.
    pub fn validate(&self, job: &Job) -> Result<(), JobError> {
        if !self.is_registered(job.kind()) {
            return Err(JobError::invalid_job(format!(
                "no handler registered for kind `{}`",
                job.kind()
            )));
        }
        job.kind().validate_payload(job.payload())?;
        if job.kind() == JobKind::Closure && job.closure_fn().is_none() {
            return Err(JobError::invalid_job("closure job carries no closure"));
        }
        Ok(())
    }

    /// Instantiate the handler for `job`.
    pub fn resolve(&self, job: &Job) -> Result<Box<dyn Handler>, JobError> {
        self.validate(job)?;
        let factory = self.factories.get(&job.kind()).ok_or_else(|| {
            JobError::invalid_job(format!("no handler registered for kind `{}`", job.kind()))
        })?;
        factory(job)
    }
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut kinds: Vec<_> = self.factories.keys().copied().collect();
        kinds.sort();
        f.debug_struct("HandlerRegistry").field("kinds", &kinds).finish()
    }
}
