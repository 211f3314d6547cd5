//! Attempt and lifecycle outcomes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    success: bool,
    output: Option<String>,
    error: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    /// Identity of the handler that produced this result.
    handler: String,
}

impl ExecutionResult {
    pub fn success(
        handler: impl Into<String>,
        output: Option<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: true,
            output,
            error: None,
            started_at,
            finished_at,
            handler: handler.into(),
        }
    }

    pub fn failure(
        handler: impl Into<String>,
        error: impl Into<String>,
        output: Option<String>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            success: false,
            output,
            error: Some(error.into()),
            started_at,
            finished_at,
            handler: handler.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn handler(&self) -> &str {
        &self.handler
    }

    /// `max(0, finished - started)`.
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Per-attempt telemetry recorded by the lifecycle coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    /// Backoff slept before this attempt (0 for the first one).
    pub delay_secs: u64,
}

impl AttemptRecord {
    pub fn from_result(attempt: u32, delay_secs: u64, result: &ExecutionResult) -> Self {
        Self {
            attempt,
            success: result.is_success(),
            error: result.error().map(str::to_owned),
            duration_ms: result.duration().as_millis() as u64,
            delay_secs,
        }
    }
}

/// Aggregate of a full run (all attempts of one job).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleOutcome {
    result: ExecutionResult,
    attempts: u32,
    final_failure: bool,
    requeued: bool,
    telemetry: Vec<AttemptRecord>,
}

impl LifecycleOutcome {
    pub fn new(
        result: ExecutionResult,
        final_failure: bool,
        requeued: bool,
        telemetry: Vec<AttemptRecord>,
    ) -> Self {
        // Never report zero attempts for a finished run.
        let attempts = (telemetry.len() as u32).max(1);
        Self {
            result,
            attempts,
            final_failure,
            requeued,
            telemetry,
        }
    }

    pub fn result(&self) -> &ExecutionResult {
        &self.result
    }

    pub fn into_result(self) -> ExecutionResult {
        self.result
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_final_failure(&self) -> bool {
        self.final_failure
    }

    pub fn is_requeued(&self) -> bool {
        self.requeued
    }

    pub fn telemetry(&self) -> &[AttemptRecord] {
        &self.telemetry
    }

    /// Backoff delays actually applied between attempts, in order.
    pub fn delays(&self) -> Vec<u64> {
        self.telemetry.iter().skip(1).map(|r| r.delay_secs).collect()
    }
}
