//! Exponential backoff for transient persistence failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry settings as they appear in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Extra `jitter_fraction / 2 * delay` added to every delay (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("retry.multiplier must be >= 1.0, got {}", self.multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(format!(
                "retry.jitter_fraction must be within 0.0..=1.0, got {}",
                self.jitter_fraction
            ));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err("retry.initial_backoff_ms exceeds retry.max_backoff_ms".into());
        }
        Ok(())
    }
}

/// Stateless policy: computes the delay for a given retry number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based), or `None` once
    /// `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_ms = self.config.initial_backoff_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = base_ms.min(self.config.max_backoff_ms as f64);

        // deterministic half-jitter keeps delays reproducible in tests
        let jitter_ms = capped * self.config.jitter_fraction * 0.5;
        Some(Duration::from_millis((capped + jitter_ms) as u64))
    }

    /// `true` if another retry is allowed after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_retries
    }
}
