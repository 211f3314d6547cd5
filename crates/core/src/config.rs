//! Runner configuration.
//!
//! Built once at process start and handed to the runtime explicitly; nothing
//! here is cached globally.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Retry/backoff parameters, keyed by strategy name.
///
/// `strategy` is one of `none`, `fixed`, `exponential`; unrecognized names
/// fall back to no backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: String,
    pub base_secs: u64,
    pub multiplier: f64,
    pub jitter: bool,
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: "none".to_string(),
            base_secs: 1,
            multiplier: 2.0,
            jitter: false,
            max_delay_secs: 3600,
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn fixed(base_secs: u64) -> Self {
        Self {
            strategy: "fixed".to_string(),
            base_secs,
            ..Self::default()
        }
    }

    pub fn exponential(base_secs: u64, multiplier: f64, max_delay_secs: u64, jitter: bool) -> Self {
        Self {
            strategy: "exponential".to_string(),
            base_secs,
            multiplier,
            jitter,
            max_delay_secs,
        }
    }
}

/// Process-level runner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Queue used for jobs that do not name one.
    pub default_queue: String,
    /// Blocking pause between dependency-ordered cron jobs.
    pub inter_job_delay_secs: u64,
    /// Staleness bound for single-instance locks (`None` = never expire).
    pub lock_ttl_secs: Option<u64>,
    /// Backoff applied when a job does not override it.
    pub retry: RetryConfig,
    /// Publish lifecycle events when an event bus is configured.
    pub events_enabled: bool,
    /// Runner-wide switches; a job must also opt in via its own flags.
    pub notify_on_success: bool,
    pub notify_on_failure: bool,
    /// Literal secrets masked out of logged output.
    pub mask_secrets: Vec<String>,
    /// Logged output is truncated past this many bytes.
    pub max_output_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_queue: "default".to_string(),
            inter_job_delay_secs: 1,
            lock_ttl_secs: Some(24 * 60 * 60),
            retry: RetryConfig::default(),
            events_enabled: false,
            notify_on_success: true,
            notify_on_failure: true,
            mask_secrets: Vec::new(),
            max_output_bytes: 64 * 1024,
        }
    }
}

impl RunnerConfig {
    pub fn inter_job_delay(&self) -> Duration {
        Duration::from_secs(self.inter_job_delay_secs)
    }

    pub fn lock_ttl(&self) -> Option<Duration> {
        self.lock_ttl_secs.map(Duration::from_secs)
    }

    /// Load from `CRONQ_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment, test map, ...).
    ///
    /// Malformed values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();

        if let Some(queue) = lookup("CRONQ_DEFAULT_QUEUE").filter(|q| !q.trim().is_empty()) {
            cfg.default_queue = queue;
        }
        if let Some(v) = parsed(&lookup, "CRONQ_INTER_JOB_DELAY_SECS") {
            cfg.inter_job_delay_secs = v;
        }
        if let Some(raw) = lookup("CRONQ_LOCK_TTL_SECS") {
            match raw.trim() {
                "" | "0" | "none" => cfg.lock_ttl_secs = None,
                other => match other.parse() {
                    Ok(v) => cfg.lock_ttl_secs = Some(v),
                    Err(_) => warn!(key = "CRONQ_LOCK_TTL_SECS", value = %raw, "ignoring malformed config value"),
                },
            }
        }
        if let Some(strategy) = lookup("CRONQ_RETRY_STRATEGY") {
            cfg.retry.strategy = strategy.trim().to_ascii_lowercase();
        }
        if let Some(v) = parsed(&lookup, "CRONQ_RETRY_BASE_SECS") {
            cfg.retry.base_secs = v;
        }
        if let Some(v) = parsed(&lookup, "CRONQ_RETRY_MULTIPLIER") {
            cfg.retry.multiplier = v;
        }
        if let Some(v) = parsed(&lookup, "CRONQ_RETRY_JITTER") {
            cfg.retry.jitter = v;
        }
        if let Some(v) = parsed(&lookup, "CRONQ_RETRY_MAX_DELAY_SECS") {
            cfg.retry.max_delay_secs = v;
        }
        if let Some(v) = parsed(&lookup, "CRONQ_EVENTS_ENABLED") {
            cfg.events_enabled = v;
        }
        if let Some(v) = parsed(&lookup, "CRONQ_NOTIFY_ON_SUCCESS") {
            cfg.notify_on_success = v;
        }
        if let Some(v) = parsed(&lookup, "CRONQ_NOTIFY_ON_FAILURE") {
            cfg.notify_on_failure = v;
        }
        if let Some(raw) = lookup("CRONQ_MASK_SECRETS") {
            cfg.mask_secrets = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(v) = parsed(&lookup, "CRONQ_MAX_OUTPUT_BYTES") {
            cfg.max_output_bytes = v;
        }

        cfg
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring malformed config value");
            None
        }
    }
}
