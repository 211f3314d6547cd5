use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use cronq_core::ExecutionResult;

const MASK: &str = "********";

/// One structured record per attempt, handed to the log sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobLogRecord {
    pub name: String,
    pub attempt: u32,
    /// `"cron"` or `"queue"`.
    pub source: String,
    pub success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Masked output.
    pub output: Option<String>,
    /// Masked error message.
    pub error: Option<String>,
}

impl JobLogRecord {
    pub fn from_result(
        name: impl Into<String>,
        attempt: u32,
        source: impl Into<String>,
        result: &ExecutionResult,
        masker: &Masker,
    ) -> Self {
        Self {
            name: name.into(),
            attempt,
            source: source.into(),
            success: result.is_success(),
            started_at: result.started_at(),
            finished_at: result.finished_at(),
            duration_ms: result.duration().as_millis() as u64,
            output: result.output().map(|o| masker.mask(o)),
            error: result.error().map(|e| masker.mask(e)),
        }
    }
}

/// Masks configured secrets and caps output size before logging.
#[derive(Debug, Clone, Default)]
pub struct Masker {
    secrets: Vec<String>,
    max_bytes: Option<usize>,
}

impl Masker {
    pub fn new(secrets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut secrets: Vec<String> = secrets
            .into_iter()
            .map(Into::into)
            .filter(|s| !s.is_empty())
            .collect();
        // Longest first so a secret containing another is masked whole.
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        Self {
            secrets,
            max_bytes: None,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn mask(&self, text: &str) -> String {
        let mut masked = text.to_string();
        for secret in &self.secrets {
            if masked.contains(secret.as_str()) {
                masked = masked.replace(secret.as_str(), MASK);
            }
        }

        match self.max_bytes {
            Some(max) if masked.len() > max => {
                let mut cut = max;
                while !masked.is_char_boundary(cut) {
                    cut -= 1;
                }
                masked.truncate(cut);
                masked.push_str("…[truncated]");
                masked
            }
            _ => masked,
        }
    }
}

/// Job logging sink. Persistence is the implementor's concern.
pub trait JobLogSink: Send + Sync {
    fn record(&self, record: &JobLogRecord) -> anyhow::Result<()>;
}

/// Emits each record as a structured tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl JobLogSink for TracingLogSink {
    fn record(&self, record: &JobLogRecord) -> anyhow::Result<()> {
        if record.success {
            ::tracing::info!(
                job = %record.name,
                attempt = record.attempt,
                source = %record.source,
                duration_ms = record.duration_ms,
                output = record.output.as_deref().unwrap_or(""),
                "job attempt succeeded"
            );
        } else {
            ::tracing::warn!(
                job = %record.name,
                attempt = record.attempt,
                source = %record.source,
                duration_ms = record.duration_ms,
                error = record.error.as_deref().unwrap_or(""),
                "job attempt failed"
            );
        }
        Ok(())
    }
}

/// Collects records in memory (tests/dev).
#[derive(Debug, Default)]
pub struct InMemoryLogSink {
    records: Mutex<Vec<JobLogRecord>>,
}

impl InMemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<JobLogRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl JobLogSink for InMemoryLogSink {
    fn record(&self, record: &JobLogRecord) -> anyhow::Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("log sink lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}
