//! Shared test doubles.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;

use cronq_core::{Job, JobError, JobId};
use cronq_events::{JobEnvelope, Worker, WorkerError};

use super::dead_letter::{DeadLetterEntry, DeadLetterQueue};
use super::lock::LockStore;

/// Worker that records `remove_job` calls and never serves messages.
#[derive(Debug, Default)]
pub struct RecordingWorker {
    removals: Mutex<Vec<bool>>,
}

impl RecordingWorker {
    /// `recreate` flag of every `remove_job` call, in order.
    pub fn removals(&self) -> Vec<bool> {
        self.removals.lock().unwrap().clone()
    }
}

impl Worker for RecordingWorker {
    fn watch(&self, _queue: &str) -> Result<Option<JobEnvelope>, WorkerError> {
        Ok(None)
    }

    fn remove_job(&self, _job: &Job, recreate: bool) -> Result<bool, WorkerError> {
        self.removals.lock().unwrap().push(recreate);
        Ok(true)
    }

    fn reject(&self, _envelope: &JobEnvelope, _reason: &str) -> Result<bool, WorkerError> {
        Ok(true)
    }
}

/// Lock store whose backend is always down.
#[derive(Debug, Default)]
pub struct UnreachableLockStore;

impl LockStore for UnreachableLockStore {
    fn acquire(&self, _name: &str, _token: &str, _ttl: Option<Duration>) -> Result<bool, JobError> {
        Err(JobError::lock("lock store unreachable"))
    }

    fn release(&self, _name: &str, _token: &str) -> Result<bool, JobError> {
        Err(JobError::lock("lock store unreachable"))
    }

    fn holder(&self, _name: &str) -> Result<Option<String>, JobError> {
        Err(JobError::lock("lock store unreachable"))
    }
}

/// Dead-letter queue that refuses every write.
#[derive(Debug, Default)]
pub struct UnwritableDeadLetters;

impl DeadLetterQueue for UnwritableDeadLetters {
    fn push(&self, _entry: DeadLetterEntry) -> Result<(), JobError> {
        Err(JobError::backend("dead-letter store unwritable"))
    }

    fn list(&self, _limit: usize) -> Result<Vec<DeadLetterEntry>, JobError> {
        Ok(Vec::new())
    }

    fn take(&self, _id: JobId) -> Result<Option<DeadLetterEntry>, JobError> {
        Ok(None)
    }
}

/// Closure job named `name` that fails its first `failures` calls.
pub fn flaky(name: &str, failures: u32) -> Job {
    let calls = AtomicU32::new(0);
    Job::closure(json!({ "flaky": name }), move |_, _| {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        if call < failures {
            Err(format!("failure #{}", call + 1))
        } else {
            Ok(Some(json!("ok")))
        }
    })
    .with_name(name)
}
