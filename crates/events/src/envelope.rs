//! Normalized view of one reserved queue message.

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value as JsonValue};

use cronq_core::{Job, JobError, Schedulable};

/// Standard metadata every backend attaches to an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendMeta {
    /// Backend tag (e.g. `"memory"`, `"redis"`, `"sql"`).
    pub backend: String,
    /// The backend's native message id.
    pub raw_id: String,
    /// Optional backend-side status (e.g. `"reserved"`).
    pub status: Option<String>,
}

impl BackendMeta {
    pub fn new(backend: impl Into<String>, raw_id: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            raw_id: raw_id.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Opaque backend reference used for backend-specific finalization.
pub type RawRef = Arc<dyn Any + Send + Sync>;

/// Normalized, backend-agnostic view of one dequeued message.
///
/// This is the unit the queue runner hands to the lifecycle coordinator.
///
/// Notes:
/// - `id` and `queue` are never empty.
/// - `created_at` is always present (falls back to `scheduled_at`, then "now").
/// - `metadata` always carries `backend` and `raw_id`.
#[derive(Clone)]
pub struct JobEnvelope {
    id: String,
    queue: String,
    payload: JsonValue,
    name: Option<String>,
    attempts: u32,
    priority: Option<i32>,
    scheduled_at: Option<DateTime<Utc>>,
    available_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    metadata: Map<String, JsonValue>,
    raw: Option<RawRef>,
}

impl JobEnvelope {
    /// Build an envelope from a raw decoded payload.
    ///
    /// Reads `name`, `attempts`, `priority`, `schedule`, `available_at` and
    /// `created_at` from the payload. Timestamps may be RFC 3339 strings or
    /// unix seconds. Backend `extras` (ttr, delay, entity id, ...) are merged
    /// into the metadata under the standard keys.
    pub fn from_payload(
        id: impl Into<String>,
        queue: impl Into<String>,
        payload: JsonValue,
        meta: BackendMeta,
        extras: Map<String, JsonValue>,
    ) -> Result<Self, JobError> {
        let id = non_empty("id", id.into())?;
        let queue = non_empty("queue", queue.into())?;

        let name = payload
            .get("name")
            .and_then(JsonValue::as_str)
            .map(str::to_owned);
        let attempts = payload
            .get("attempts")
            .and_then(JsonValue::as_u64)
            .map(|a| a.min(u32::MAX as u64) as u32)
            .unwrap_or(0);
        let priority = payload
            .get("priority")
            .and_then(JsonValue::as_i64)
            .map(|p| p.clamp(i32::MIN as i64, i32::MAX as i64) as i32);
        let scheduled_at = payload.get("schedule").and_then(parse_timestamp);
        let available_at = payload.get("available_at").and_then(parse_timestamp);
        let created_at = payload
            .get("created_at")
            .and_then(parse_timestamp)
            .or(scheduled_at)
            .unwrap_or_else(Utc::now);

        Ok(Self {
            id,
            queue,
            payload,
            name,
            attempts,
            priority,
            scheduled_at,
            available_at,
            created_at,
            metadata: merge_metadata(meta, extras),
            raw: None,
        })
    }

    /// Build an envelope from an in-process `Job`, for backends that enqueue
    /// job-shaped values directly.
    pub fn from_job(
        job: &Job,
        default_queue: &str,
        meta: BackendMeta,
        extras: Map<String, JsonValue>,
    ) -> Result<Self, JobError> {
        let payload = job.to_json()?;
        let queue = job.queue().unwrap_or(default_queue).to_string();

        Ok(Self {
            id: job.id().to_string(),
            queue: non_empty("queue", queue)?,
            payload,
            name: Some(job.name()),
            attempts: job.attempts(),
            priority: Some(job.priority()),
            scheduled_at: job.schedule_at(),
            available_at: None,
            created_at: job.schedule_at().unwrap_or_else(Utc::now),
            metadata: merge_metadata(meta, extras),
            raw: None,
        })
    }

    /// Replace the id, for backends whose message id differs from the job id.
    pub fn with_id(mut self, id: impl Into<String>) -> Result<Self, JobError> {
        self.id = non_empty("id", id.into())?;
        Ok(self)
    }

    /// Attach the backend's opaque reference.
    pub fn with_raw(mut self, raw: RawRef) -> Self {
        self.raw = Some(raw);
        self
    }

    pub fn with_available_at(mut self, at: DateTime<Utc>) -> Self {
        self.available_at = Some(at);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at
    }

    pub fn available_at(&self) -> Option<DateTime<Utc>> {
        self.available_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn metadata(&self) -> &Map<String, JsonValue> {
        &self.metadata
    }

    pub fn backend(&self) -> &str {
        self.metadata
            .get("backend")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
    }

    /// Downcast the opaque backend reference.
    pub fn raw_as<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.raw.as_deref().and_then(|r| r.downcast_ref::<T>())
    }

    /// Turn the envelope into the job it carries.
    ///
    /// The envelope's attempt count wins over the one serialized in the
    /// payload, and the job remembers which reservation it came from.
    pub fn to_job(&self) -> Result<Job, JobError> {
        let mut job = Job::from_json(self.payload.clone())?;
        job.set_attempts(self.attempts);
        job.set_reservation(self.id.clone());
        if job.queue().is_none() {
            job = job.on_queue(self.queue.clone());
        }
        Ok(job)
    }
}

impl core::fmt::Debug for JobEnvelope {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JobEnvelope")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .field("name", &self.name)
            .field("attempts", &self.attempts)
            .field("priority", &self.priority)
            .field("created_at", &self.created_at)
            .field("metadata", &self.metadata)
            .field("raw", &self.raw.is_some())
            .finish()
    }
}

fn non_empty(field: &str, value: String) -> Result<String, JobError> {
    if value.trim().is_empty() {
        return Err(JobError::validation(format!("envelope `{field}` must not be empty")));
    }
    Ok(value)
}

fn merge_metadata(meta: BackendMeta, extras: Map<String, JsonValue>) -> Map<String, JsonValue> {
    let mut metadata = extras;
    metadata.insert("backend".to_string(), JsonValue::String(meta.backend));
    metadata.insert("raw_id".to_string(), JsonValue::String(meta.raw_id));
    if let Some(status) = meta.status {
        metadata.insert("status".to_string(), JsonValue::String(status));
    }
    metadata
}

pub(crate) fn parse_timestamp(value: &JsonValue) -> Option<DateTime<Utc>> {
    match value {
        JsonValue::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        JsonValue::Number(n) => n
            .as_i64()
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronq_core::JobKind;
    use serde_json::json;

    fn meta() -> BackendMeta {
        BackendMeta::new("memory", "42")
    }

    #[test]
    fn payload_fields_are_extracted() {
        let env = JobEnvelope::from_payload(
            "42",
            "reports",
            json!({
                "kind": "shell",
                "payload": {"command": "ls"},
                "name": "ls",
                "attempts": 2,
                "priority": 7,
                "schedule": "2024-01-02T03:04:05Z",
                "available_at": 1_700_000_000,
            }),
            meta().with_status("reserved"),
            Map::new(),
        )
        .unwrap();

        assert_eq!(env.name(), Some("ls"));
        assert_eq!(env.attempts(), 2);
        assert_eq!(env.priority(), Some(7));
        assert_eq!(env.created_at(), env.scheduled_at().unwrap());
        assert_eq!(env.available_at().unwrap().timestamp(), 1_700_000_000);
        assert_eq!(env.backend(), "memory");
        assert_eq!(env.metadata()["raw_id"], "42");
        assert_eq!(env.metadata()["status"], "reserved");
    }

    #[test]
    fn created_at_falls_back_to_now() {
        let before = Utc::now();
        let env = JobEnvelope::from_payload("1", "q", json!({}), meta(), Map::new()).unwrap();
        assert!(env.created_at() >= before);
    }

    #[test]
    fn explicit_created_at_wins_over_schedule() {
        let env = JobEnvelope::from_payload(
            "1",
            "q",
            json!({"schedule": 100, "created_at": 50}),
            meta(),
            Map::new(),
        )
        .unwrap();
        assert_eq!(env.created_at().timestamp(), 50);
    }

    #[test]
    fn empty_id_or_queue_is_rejected() {
        assert!(matches!(
            JobEnvelope::from_payload("", "q", json!({}), meta(), Map::new()),
            Err(JobError::Validation(_))
        ));
        assert!(matches!(
            JobEnvelope::from_payload("1", " ", json!({}), meta(), Map::new()),
            Err(JobError::Validation(_))
        ));
    }

    #[test]
    fn extras_are_merged_with_standard_keys() {
        let mut extras = Map::new();
        extras.insert("ttr".into(), json!(60));
        extras.insert("backend".into(), json!("spoofed"));

        let env = JobEnvelope::from_payload("1", "q", json!({}), meta(), extras).unwrap();
        assert_eq!(env.metadata()["ttr"], 60);
        assert_eq!(env.backend(), "memory");
    }

    #[test]
    fn from_job_uses_job_fields() {
        let job = Job::new(JobKind::Shell, json!({"command": "ls"}))
            .with_name("ls")
            .with_priority(3);
        let env = JobEnvelope::from_job(&job, "default", meta(), Map::new()).unwrap();

        assert_eq!(env.id(), job.id().to_string());
        assert_eq!(env.queue(), "default");
        assert_eq!(env.name(), Some("ls"));
        assert_eq!(env.priority(), Some(3));

        let back = env.to_job().unwrap();
        assert_eq!(back.name(), "ls");
        assert_eq!(back.reservation(), Some(env.id()));
        assert_eq!(back.queue(), Some("default"));
    }

    #[test]
    fn raw_reference_downcasts() {
        let env = JobEnvelope::from_payload("1", "q", json!({}), meta(), Map::new())
            .unwrap()
            .with_raw(Arc::new(17_u64));
        assert_eq!(env.raw_as::<u64>(), Some(&17));
        assert_eq!(env.raw_as::<String>(), None);
    }
}
