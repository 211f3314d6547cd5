//! The `Job` descriptor and its capability interfaces.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use crate::error::JobError;
use crate::id::JobId;
use crate::kind::JobKind;

/// Invocable body of a `Closure` job.
///
/// Receives the job payload and a sink for incidental output. `Ok(data)` is a
/// success carrying optional data, `Err(message)` a failure.
type ClosureFn = dyn Fn(&JsonValue, &mut dyn Write) -> Result<Option<JsonValue>, String> + Send + Sync;

/// Owned closure for `JobKind::Closure` jobs, invoked once per attempt.
#[derive(Clone)]
pub struct JobClosure(Arc<ClosureFn>);

impl JobClosure {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&JsonValue, &mut dyn Write) -> Result<Option<JsonValue>, String> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn call(&self, payload: &JsonValue, out: &mut dyn Write) -> Result<Option<JsonValue>, String> {
        (self.0)(payload, out)
    }
}

impl core::fmt::Debug for JobClosure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("JobClosure(..)")
    }
}

/// A schedulable/enqueueable unit of work.
///
/// Owned by whichever driver (cron runner or queue runner) is processing it and
/// mutated in place across attempts (attempt counter, running flag). The
/// serialized form is what queue backends store; the closure, running flag and
/// queue reservation never leave the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    id: JobId,
    kind: JobKind,
    #[serde(default)]
    payload: JsonValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(default)]
    single_instance: bool,
    #[serde(default)]
    max_retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timeout_secs: Option<u64>,
    #[serde(default)]
    notify_on_success: bool,
    #[serde(default)]
    notify_on_failure: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    queue: Option<String>,
    #[serde(default)]
    priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    schedule: Option<DateTime<Utc>>,
    #[serde(default)]
    attempts: u32,

    #[serde(skip)]
    running: bool,
    #[serde(skip)]
    closure: Option<JobClosure>,
    /// Backend message id of the reservation this job was built from.
    #[serde(skip)]
    reservation: Option<String>,
}

impl Job {
    /// Create a new job of `kind` with `payload`.
    pub fn new(kind: JobKind, payload: JsonValue) -> Self {
        Self {
            id: JobId::new(),
            kind,
            payload,
            name: None,
            depends_on: Vec::new(),
            single_instance: false,
            max_retries: 0,
            timeout_secs: None,
            notify_on_success: false,
            notify_on_failure: false,
            queue: None,
            priority: 0,
            schedule: None,
            attempts: 0,
            running: false,
            closure: None,
            reservation: None,
        }
    }

    /// Create a `Closure` job. `payload` describes the closure and feeds the
    /// derived name.
    pub fn closure<F>(payload: JsonValue, f: F) -> Self
    where
        F: Fn(&JsonValue, &mut dyn Write) -> Result<Option<JsonValue>, String> + Send + Sync + 'static,
    {
        let mut job = Self::new(JobKind::Closure, payload);
        job.closure = Some(JobClosure::new(f));
        job
    }

    /// Rebuild a job from its serialized form (as stored by queue backends).
    pub fn from_json(value: JsonValue) -> Result<Self, JobError> {
        serde_json::from_value(value)
            .map_err(|e| JobError::validation(format!("payload is not a job: {e}")))
    }

    pub fn to_json(&self) -> Result<JsonValue, JobError> {
        if self.kind == JobKind::Closure {
            return Err(JobError::validation(
                "closure jobs cannot be serialized for a queue backend",
            ));
        }
        Ok(serde_json::to_value(self)?)
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn depends_on(mut self, name: impl Into<String>) -> Self {
        self.depends_on.push(name.into());
        self
    }

    pub fn single_instance(mut self, enabled: bool) -> Self {
        self.single_instance = enabled;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs().max(1));
        self
    }

    pub fn notify_on(mut self, success: bool, failure: bool) -> Self {
        self.notify_on_success = success;
        self.notify_on_failure = failure;
        self
    }

    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.schedule = Some(at);
        self
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Explicit name if set, otherwise `<kind>:<hash>` derived from the
    /// serialized payload. Stable for identical (kind, payload) pairs.
    pub fn name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => derive_name(self.kind, &self.payload),
        }
    }

    pub fn explicit_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_single_instance(&self) -> bool {
        self.single_instance
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
    }

    pub fn increment_attempts(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    pub fn closure_fn(&self) -> Option<&JobClosure> {
        self.closure.as_ref()
    }

    pub fn reservation(&self) -> Option<&str> {
        self.reservation.as_deref()
    }

    pub fn set_reservation(&mut self, message_id: impl Into<String>) {
        self.reservation = Some(message_id.into());
    }
}

fn derive_name(kind: JobKind, payload: &JsonValue) -> String {
    // serde_json maps are ordered, so equal payloads serialize identically.
    let serialized = serde_json::to_string(payload).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(serialized.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}", kind.as_str(), &digest[..16])
}

/// Time-based scheduling capability.
pub trait Schedulable {
    fn schedule_at(&self) -> Option<DateTime<Utc>>;

    fn priority(&self) -> i32;

    /// A job without a schedule timestamp is always due.
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.schedule_at().is_none_or(|at| at <= now)
    }
}

/// Notification preferences of a job.
pub trait Notifiable {
    fn notify_on_success(&self) -> bool;

    fn notify_on_failure(&self) -> bool;

    fn wants_notification(&self, success: bool) -> bool {
        if success {
            self.notify_on_success()
        } else {
            self.notify_on_failure()
        }
    }
}

/// Inter-job dependency capability.
pub trait Dependent {
    fn dependencies(&self) -> &[String];

    fn has_dependencies(&self) -> bool {
        !self.dependencies().is_empty()
    }
}

impl Schedulable for Job {
    fn schedule_at(&self) -> Option<DateTime<Utc>> {
        self.schedule
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

impl Notifiable for Job {
    fn notify_on_success(&self) -> bool {
        self.notify_on_success
    }

    fn notify_on_failure(&self) -> bool {
        self.notify_on_failure
    }
}

impl Dependent for Job {
    fn dependencies(&self) -> &[String] {
        &self.depends_on
    }
}
