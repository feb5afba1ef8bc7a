//! Retry policy and backoff computation
//!
//! Delays grow exponentially from `retry_delay_ms` by `backoff_multiplier`,
//! are capped at `max_retry_delay_ms` and perturbed by a symmetric jitter of
//! `jitter_ratio`. Every field is clamped to its allowed range before use so
//! caller input can never produce a negative or unbounded wait.

use crate::error::{Error, ErrorCategory};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const MAX_RETRIES_LIMIT: u32 = 5;
pub const RETRY_DELAY_LIMIT_MS: u64 = 5_000;
pub const MAX_RETRY_DELAY_LIMIT_MS: u64 = 30_000;
pub const BACKOFF_MULTIPLIER_RANGE: (f64, f64) = (1.0, 4.0);

/// Which failures a policy retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryOn {
    All,
    Network,
    Timeout,
    Server,
    Unsupported,
    Unknown,
}

impl RetryOn {
    fn matches(&self, category: ErrorCategory) -> bool {
        match self {
            RetryOn::All => true,
            RetryOn::Network => category == ErrorCategory::Network,
            RetryOn::Timeout => category == ErrorCategory::Timeout,
            RetryOn::Server => category == ErrorCategory::Server,
            RetryOn::Unsupported => category == ErrorCategory::Unsupported,
            RetryOn::Unknown => category == ErrorCategory::Unknown,
        }
    }
}

impl std::str::FromStr for RetryOn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(RetryOn::All),
            "network" => Ok(RetryOn::Network),
            "timeout" => Ok(RetryOn::Timeout),
            "server" => Ok(RetryOn::Server),
            "unsupported" => Ok(RetryOn::Unsupported),
            "unknown" => Ok(RetryOn::Unknown),
            other => Err(Error::InvalidConfig(format!("unknown retry category: {}", other))),
        }
    }
}

/// Retry policy applied within each resolved candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt, 0..=5
    pub max_retries: u32,
    /// Base delay in milliseconds, 0..=5000; 0 disables backoff
    pub retry_delay_ms: u64,
    /// Delay cap in milliseconds, 0..=30000
    pub max_retry_delay_ms: u64,
    /// Exponential growth factor, 1..=4
    pub backoff_multiplier: f64,
    /// Symmetric jitter as a fraction of the delay, 0..=1
    pub jitter_ratio: f64,
    /// Failure categories that trigger a retry
    pub retry_on: Vec<RetryOn>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay_ms: 1_000,
            max_retry_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            jitter_ratio: 0.2,
            retry_on: vec![RetryOn::Network, RetryOn::Timeout, RetryOn::Server],
        }
    }
}

fn clamp_f64(value: f64, min: f64, max: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        fallback
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Copy of this policy with every field clamped to its range
    pub fn normalized(&self) -> Self {
        let defaults = Self::default();
        let retry_on = if self.retry_on.is_empty() {
            defaults.retry_on.clone()
        } else {
            self.retry_on.clone()
        };
        Self {
            max_retries: self.max_retries.min(MAX_RETRIES_LIMIT),
            retry_delay_ms: self.retry_delay_ms.min(RETRY_DELAY_LIMIT_MS),
            max_retry_delay_ms: self.max_retry_delay_ms.min(MAX_RETRY_DELAY_LIMIT_MS),
            backoff_multiplier: clamp_f64(
                self.backoff_multiplier,
                BACKOFF_MULTIPLIER_RANGE.0,
                BACKOFF_MULTIPLIER_RANGE.1,
                defaults.backoff_multiplier,
            ),
            jitter_ratio: clamp_f64(self.jitter_ratio, 0.0, 1.0, 0.0),
            retry_on,
        }
    }

    /// Attempts a resolved candidate gets under this policy
    pub fn attempts_per_candidate(&self) -> u32 {
        self.normalized().max_retries + 1
    }

    /// Whether a failure of `category` on attempt `attempt` (0-indexed) is retried
    pub fn should_retry(&self, category: ErrorCategory, attempt: u32) -> bool {
        let policy = self.normalized();
        if attempt >= policy.max_retries {
            return false;
        }
        policy.retry_on.iter().any(|r| r.matches(category))
    }

    /// Delay before retry number `retry_index` (0-indexed), in milliseconds
    pub fn delay_ms(&self, retry_index: u32) -> u64 {
        let sample = rand::rng().random::<f64>();
        self.delay_ms_with_sample(retry_index, sample)
    }

    /// Delay before retry number `retry_index` with a caller-supplied uniform
    /// sample in `[0, 1]` driving the jitter.
    pub fn delay_ms_with_sample(&self, retry_index: u32, sample: f64) -> u64 {
        let policy = self.normalized();
        if policy.retry_delay_ms == 0 {
            return 0;
        }

        let cap = policy.max_retry_delay_ms as f64;
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let grown = policy.retry_delay_ms as f64 * policy.backoff_multiplier.powi(exponent);
        let delay = if grown.is_finite() { grown.min(cap) } else { cap };

        if policy.jitter_ratio <= 0.0 {
            return delay.floor() as u64;
        }

        let spread = delay * policy.jitter_ratio;
        let offset = (sample.clamp(0.0, 1.0) * 2.0 - 1.0) * spread;
        (delay + offset).clamp(0.0, cap).floor() as u64
    }

    /// Same as [`RetryPolicy::delay_ms`] as a `Duration`
    pub fn delay(&self, retry_index: u32) -> Duration {
        Duration::from_millis(self.delay_ms(retry_index))
    }
}

/// Compute the delay before retry `retry_index` under `policy`
pub fn calculate_retry_delay(policy: &RetryPolicy, retry_index: u32) -> u64 {
    policy.delay_ms(retry_index)
}

/// Retry category of a failed attempt. Callers check
/// [`Error::is_cancellation`] first; cancellations classify as unknown.
pub fn classify_error(error: &Error) -> ErrorCategory {
    if error.is_cancellation() {
        return ErrorCategory::Unknown;
    }
    error.category()
}
