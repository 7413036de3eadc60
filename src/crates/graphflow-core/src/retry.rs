//! Retry policies for failed nodes
//!
//! A node opts into retries through the `retry_config` block of its configuration:
//!
//! ```json
//! {"retry_config": {"retry_enabled": true, "max_retries": 3, "retry_interval": 500}}
//! ```
//!
//! The engine turns that block into a [`RetryPolicy`] and asks it for the wait before each
//! re-dispatch. Waiting happens on a timer task, never on the dispatcher itself.
//!
//! ```text
//! NodeRunFailed ──► retry_count < max_retries ? ──yes──► NodeRunRetry, sleep(delay), re-enqueue
//!                                │
//!                                no
//!                                ▼
//!                       node error strategy
//! ```
//!
//! # Delay calculation
//!
//! ```text
//! delay = initial × (backoff_factor ^ attempt)
//! delay = min(delay, max_interval)
//! if jitter: delay *= random(0.5..1.5)
//! ```
//!
//! Node retry configs use a fixed interval (`backoff_factor = 1.0`, no jitter) unless they set
//! `backoff_factor` explicitly.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff schedule for repeated attempts
///
/// ```rust
/// use graphflow_core::retry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new(3)
///     .with_initial_interval(0.1)
///     .with_backoff_factor(2.0)
///     .with_jitter(false);
///
/// assert_eq!(policy.calculate_delay(0), Duration::from_millis(100));
/// assert_eq!(policy.calculate_delay(1), Duration::from_millis(200));
/// assert!(!policy.should_retry(3));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries
    pub max_attempts: usize,

    /// First wait in seconds
    pub initial_interval: f64,

    pub backoff_factor: f64,

    /// Upper bound for a single wait in seconds
    pub max_interval: f64,

    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 128.0,
            jitter: true,
        }
    }

    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Wait before retry number `attempt` (zero based)
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        if attempt >= self.max_attempts {
            return Duration::from_secs(0);
        }

        let base_delay = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_interval).max(0.0);

        let final_delay = if self.jitter {
            let mut rng = rand::thread_rng();
            capped_delay * rng.gen_range(0.5..=1.5)
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }

    pub fn should_retry(&self, attempt: usize) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

fn default_backoff_factor() -> f64 {
    1.0
}

/// Per-node `retry_config` block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub retry_enabled: bool,

    #[serde(default)]
    pub max_retries: u32,

    /// Wait between attempts in milliseconds
    #[serde(default)]
    pub retry_interval: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_enabled: false,
            max_retries: 0,
            retry_interval: 0,
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    pub fn retry_interval_seconds(&self) -> f64 {
        self.retry_interval as f64 / 1000.0
    }

    /// Whether a node that already retried `retry_count` times may run again
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        self.retry_enabled && retry_count < self.max_retries
    }

    pub fn to_policy(&self) -> RetryPolicy {
        let interval = self.retry_interval_seconds();
        RetryPolicy::new(self.max_retries as usize)
            .with_initial_interval(interval)
            .with_backoff_factor(self.backoff_factor)
            .with_max_interval(interval.max(1.0) * 128.0)
            .with_jitter(false)
    }
}
