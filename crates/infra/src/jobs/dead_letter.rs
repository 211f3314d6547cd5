//! Dead-letter queue for jobs that exhausted their retry budget.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::Serialize;

use cronq_core::{Job, JobError, JobId};

use super::context::JobSource;

/// Entry in the dead-letter queue.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub job: Job,
    pub source: JobSource,
    pub attempts: u32,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(job: Job, source: JobSource, attempts: u32, reason: impl Into<String>) -> Self {
        Self {
            job,
            source,
            attempts,
            reason: reason.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}

/// Sink for permanently failed jobs.
pub trait DeadLetterQueue: Send + Sync {
    fn push(&self, entry: DeadLetterEntry) -> Result<(), JobError>;

    /// Oldest first, at most `limit` entries.
    fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobError>;

    /// Remove an entry, e.g. to re-run it by hand.
    fn take(&self, id: JobId) -> Result<Option<DeadLetterEntry>, JobError>;
}

/// In-memory dead-letter queue for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterQueue {
    entries: RwLock<Vec<DeadLetterEntry>>,
}

impl InMemoryDeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeadLetterQueue for InMemoryDeadLetterQueue {
    fn push(&self, entry: DeadLetterEntry) -> Result<(), JobError> {
        self.entries
            .write()
            .map_err(|_| JobError::backend("dead-letter queue poisoned"))?
            .push(entry);
        Ok(())
    }

    fn list(&self, limit: usize) -> Result<Vec<DeadLetterEntry>, JobError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| JobError::backend("dead-letter queue poisoned"))?;
        Ok(entries.iter().take(limit).cloned().collect())
    }

    fn take(&self, id: JobId) -> Result<Option<DeadLetterEntry>, JobError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| JobError::backend("dead-letter queue poisoned"))?;
        Ok(entries
            .iter()
            .position(|e| e.job.id() == id)
            .map(|idx| entries.remove(idx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cronq_core::JobKind;
    use serde_json::json;

    #[test]
    fn push_list_take() {
        let dlq = InMemoryDeadLetterQueue::new();
        let a = Job::new(JobKind::Shell, json!({"command": "false"})).with_name("a");
        let b = Job::new(JobKind::Shell, json!({"command": "false"})).with_name("b");
        let b_id = b.id();

        dlq.push(DeadLetterEntry::new(a, JobSource::Cron, 3, "exit 1")).unwrap();
        dlq.push(DeadLetterEntry::new(b, JobSource::Queue, 1, "exit 1")).unwrap();
        assert_eq!(dlq.len(), 2);
        assert_eq!(dlq.list(1).unwrap()[0].job.name(), "a");

        let taken = dlq.take(b_id).unwrap().unwrap();
        assert_eq!(taken.source, JobSource::Queue);
        assert!(dlq.take(b_id).unwrap().is_none());
        assert_eq!(dlq.len(), 1);
    }
}
