//! In-memory queue backend for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue, json};
use tracing::{debug, warn};

use cronq_core::{Job, Schedulable};

use crate::envelope::{BackendMeta, JobEnvelope, parse_timestamp};
use crate::worker::{Queue, Worker, WorkerError};

const BACKEND: &str = "memory";

#[derive(Debug, Clone)]
enum Stored {
    /// Raw data object, decoded with `JobEnvelope::from_payload`.
    Raw(JsonValue),
    /// Job-shaped value, decoded with `JobEnvelope::from_job`.
    Job(Job),
}

#[derive(Debug, Clone)]
struct Message {
    id: String,
    queue: String,
    body: Stored,
    attempts: u32,
    priority: i32,
    available_at: Option<DateTime<Utc>>,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    next_seq: u64,
    ready: Vec<Message>,
    reserved: HashMap<String, Message>,
    rejected: Vec<(String, String)>,
}

/// In-memory queue implementing both the producing and consuming contract.
///
/// - Higher priority first, FIFO within equal priority
/// - Messages with a future `available_at` are skipped until due
/// - Re-dispatch (`remove_job(.., true)`) bumps the attempt count; `release` does not
#[derive(Debug)]
pub struct InMemoryQueue {
    default_queue: String,
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new(default_queue: impl Into<String>) -> Self {
        Self {
            default_queue: default_queue.into(),
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn arc(default_queue: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(default_queue))
    }

    /// Enqueue a `Job` value directly (job-shaped backend path).
    pub fn push_job(&self, job: &Job) -> Result<String, WorkerError> {
        // Reject what could never be decoded on the consuming side.
        job.to_json().map_err(|e| WorkerError::Invalid(e.to_string()))?;

        let queue = job.queue().unwrap_or(&self.default_queue).to_string();
        let priority = job.priority();
        let available_at = job.schedule_at();
        self.push(queue, Stored::Job(job.clone()), job.attempts(), priority, available_at)
    }

    /// Messages waiting on `queue` (reserved ones excluded).
    pub fn len(&self, queue: &str) -> usize {
        self.lock()
            .map(|s| s.ready.iter().filter(|m| m.queue == queue).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    pub fn reserved_count(&self) -> usize {
        self.lock().map(|s| s.reserved.len()).unwrap_or(0)
    }

    /// `(message id, reason)` pairs dropped via `reject`.
    pub fn rejected(&self) -> Vec<(String, String)> {
        self.lock().map(|s| s.rejected.clone()).unwrap_or_default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, WorkerError> {
        self.state.lock().map_err(|_| WorkerError::Poisoned)
    }

    fn push(
        &self,
        queue: String,
        body: Stored,
        attempts: u32,
        priority: i32,
        available_at: Option<DateTime<Utc>>,
    ) -> Result<String, WorkerError> {
        let mut state = self.lock()?;
        state.next_seq += 1;
        let seq = state.next_seq;
        // One id per message; the same job may be enqueued more than once.
        let id = format!("mem-{seq}");
        state.ready.push(Message {
            id: id.clone(),
            queue,
            body,
            attempts,
            priority,
            available_at,
            seq,
        });
        Ok(id)
    }

    /// Back of the line within its priority.
    fn requeue(state: &mut QueueState, mut msg: Message) {
        state.next_seq += 1;
        msg.seq = state.next_seq;
        state.ready.push(msg);
    }

    fn to_envelope(&self, msg: &Message) -> Result<JobEnvelope, WorkerError> {
        let meta = BackendMeta::new(BACKEND, msg.id.clone()).with_status("reserved");
        let mut extras = Map::new();
        extras.insert("seq".to_string(), json!(msg.seq));
        extras.insert("reserved_at".to_string(), json!(Utc::now().to_rfc3339()));

        let envelope = match &msg.body {
            Stored::Raw(data) => {
                let mut data = data.clone();
                if let Some(obj) = data.as_object_mut() {
                    obj.insert("attempts".to_string(), json!(msg.attempts));
                }
                JobEnvelope::from_payload(msg.id.clone(), msg.queue.clone(), data, meta, extras)
            }
            Stored::Job(job) => {
                let mut job = job.clone();
                job.set_attempts(msg.attempts);
                JobEnvelope::from_job(&job, &self.default_queue, meta, extras)
                    .and_then(|env| env.with_id(msg.id.clone()))
            }
        }
        .map_err(|e| WorkerError::Invalid(e.to_string()))?;

        let envelope = match msg.available_at {
            Some(at) => envelope.with_available_at(at),
            None => envelope,
        };
        Ok(envelope.with_raw(Arc::new(msg.seq)))
    }
}

impl Queue for InMemoryQueue {
    fn enqueue(&self, data: JsonValue) -> Result<String, WorkerError> {
        if !data.is_object() {
            return Err(WorkerError::Invalid("queue data must be a JSON object".to_string()));
        }
        let queue = data
            .get("queue")
            .and_then(JsonValue::as_str)
            .unwrap_or(&self.default_queue)
            .to_string();
        let priority = data
            .get("priority")
            .and_then(JsonValue::as_i64)
            .unwrap_or(0)
            .clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        let attempts = data
            .get("attempts")
            .and_then(JsonValue::as_u64)
            .unwrap_or(0)
            .min(u32::MAX as u64) as u32;
        let available_at = data.get("available_at").and_then(parse_timestamp);

        self.push(queue, Stored::Raw(data), attempts, priority, available_at)
    }
}

impl Worker for InMemoryQueue {
    fn watch(&self, queue: &str) -> Result<Option<JobEnvelope>, WorkerError> {
        let now = Utc::now();
        let mut state = self.lock()?;

        let next = state
            .ready
            .iter()
            .enumerate()
            .filter(|(_, m)| m.queue == queue && m.available_at.is_none_or(|at| at <= now))
            .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.seq.cmp(&a.seq)))
            .map(|(idx, _)| idx);

        let Some(idx) = next else {
            return Ok(None);
        };

        let msg = state.ready.remove(idx);
        let envelope = match self.to_envelope(&msg) {
            Ok(env) => env,
            Err(e) => {
                // Undecodable messages are parked as rejected, never re-served.
                warn!(queue, id = %msg.id, error = %e, "dropping undecodable message");
                state.rejected.push((msg.id.clone(), e.to_string()));
                return Err(e);
            }
        };
        debug!(queue, id = %msg.id, attempts = msg.attempts, "reserved message");
        state.reserved.insert(msg.id.clone(), msg);
        Ok(Some(envelope))
    }

    fn remove_job(&self, job: &Job, recreate: bool) -> Result<bool, WorkerError> {
        let id = job
            .reservation()
            .ok_or_else(|| WorkerError::UnknownReservation(job.name()))?;

        let mut state = self.lock()?;
        let Some(mut msg) = state.reserved.remove(id) else {
            return Ok(false);
        };

        debug!(id, recreate, "finalizing reservation");
        if recreate {
            msg.attempts = msg.attempts.saturating_add(1);
            if let Stored::Job(stored) = &mut msg.body {
                stored.set_attempts(msg.attempts);
            }
            Self::requeue(&mut state, msg);
        }
        Ok(true)
    }

    fn release(&self, job: &Job) -> Result<bool, WorkerError> {
        let id = job
            .reservation()
            .ok_or_else(|| WorkerError::UnknownReservation(job.name()))?;

        let mut state = self.lock()?;
        let Some(msg) = state.reserved.remove(id) else {
            return Ok(false);
        };
        debug!(id, attempts = msg.attempts, "releasing reservation");
        Self::requeue(&mut state, msg);
        Ok(true)
    }

    fn reject(&self, envelope: &JobEnvelope, reason: &str) -> Result<bool, WorkerError> {
        let mut state = self.lock()?;
        let found = state.reserved.remove(envelope.id()).is_some();
        state.rejected.push((envelope.id().to_string(), reason.to_string()));
        Ok(found)
    }
}
