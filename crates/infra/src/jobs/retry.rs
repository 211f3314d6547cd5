//! Retry policies.
//!
//! A policy is a pure function of the *upcoming* attempt number (1-based) to
//! a delay in whole seconds. No delay ever precedes the first attempt.

use core::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use cronq_core::RetryConfig;

/// Relative jitter applied by [`ExponentialBackoff`] when enabled.
const JITTER_RATIO: f64 = 0.15;

/// Delay computation between attempts.
pub trait RetryPolicy: Send + Sync {
    /// Seconds to wait before `attempt`. Returns 0 for `attempt <= 1`.
    fn compute_delay(&self, attempt: u32) -> u64;

    fn strategy(&self) -> BackoffStrategy;
}

/// Backoff strategy key, as found in `RetryConfig::strategy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Never wait.
    #[default]
    None,
    /// Constant delay between retries
    Fixed,
    /// base * multiplier^(attempt-2), capped
    Exponential,
}

impl BackoffStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackoffStrategy::None => "none",
            BackoffStrategy::Fixed => "fixed",
            BackoffStrategy::Exponential => "exponential",
        }
    }
}

impl FromStr for BackoffStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(BackoffStrategy::None),
            "fixed" => Ok(BackoffStrategy::Fixed),
            "exponential" => Ok(BackoffStrategy::Exponential),
            other => Err(format!("unknown backoff strategy `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoBackoff;

impl RetryPolicy for NoBackoff {
    fn compute_delay(&self, _attempt: u32) -> u64 {
        0
    }

    fn strategy(&self) -> BackoffStrategy {
        BackoffStrategy::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    pub base_secs: u64,
}

impl FixedBackoff {
    pub fn new(base_secs: u64) -> Self {
        Self { base_secs }
    }
}

impl RetryPolicy for FixedBackoff {
    fn compute_delay(&self, attempt: u32) -> u64 {
        if attempt <= 1 { 0 } else { self.base_secs }
    }

    fn strategy(&self) -> BackoffStrategy {
        BackoffStrategy::Fixed
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    pub base_secs: u64,
    pub multiplier: f64,
    pub max_delay_secs: u64,
    pub jitter: bool,
}

impl ExponentialBackoff {
    pub fn new(base_secs: u64, multiplier: f64, max_delay_secs: u64) -> Self {
        Self {
            base_secs,
            multiplier,
            max_delay_secs,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Capped delay before jitter.
    fn base_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(2).min(i32::MAX as u32) as i32;
        let raw = (self.base_secs as f64) * self.multiplier.powi(exponent);
        let max = self.max_delay_secs as f64;
        // NaN/inf from silly multipliers collapse onto the cap.
        if !raw.is_finite() || raw >= max {
            return self.max_delay_secs;
        }
        raw.max(0.0).round() as u64
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn compute_delay(&self, attempt: u32) -> u64 {
        if attempt <= 1 {
            return 0;
        }
        let delay = self.base_delay(attempt);
        if !self.jitter {
            return delay;
        }

        let spread = delay as f64 * JITTER_RATIO;
        let offset = if spread > 0.0 {
            rand::thread_rng().gen_range(-spread..=spread)
        } else {
            0.0
        };
        ((delay as f64 + offset).round() as u64).max(1)
    }

    fn strategy(&self) -> BackoffStrategy {
        BackoffStrategy::Exponential
    }
}

/// Build the policy named by `config.strategy`.
///
/// Unknown strategy names fall back to [`NoBackoff`].
pub fn policy_from_config(config: &RetryConfig) -> Box<dyn RetryPolicy> {
    let strategy = config.strategy.parse::<BackoffStrategy>().unwrap_or_else(|e| {
        warn!(error = %e, "falling back to no backoff");
        BackoffStrategy::None
    });

    match strategy {
        BackoffStrategy::None => Box::new(NoBackoff),
        BackoffStrategy::Fixed => Box::new(FixedBackoff::new(config.base_secs)),
        BackoffStrategy::Exponential => Box::new(
            ExponentialBackoff::new(config.base_secs, config.multiplier, config.max_delay_secs)
                .with_jitter(config.jitter),
        ),
    }
}
