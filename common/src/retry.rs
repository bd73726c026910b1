// Redelivery backoff with exponential growth and jitter
//
// The number of attempts is owned by the queue backend (`max_deliver`); this module only
// decides how long a failed delivery waits before it is offered again.

use crate::config::JobsConfig;
use rand::Rng;
use std::time::Duration;

/// Retry strategy trait for calculating redelivery delays
pub trait RetryStrategy: Send + Sync {
    /// Delay before redelivering a message that has failed `attempt` times (1-based)
    fn next_delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff retry strategy with jitter
/// Sequence: 5s, 15s, 45s, 135s, ... capped at max_delay
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay_secs: u64,
    max_delay_secs: u64,
    /// Jitter factor (0.0 to 1.0)
    jitter_factor: f64,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            max_delay_secs: 1800, // 30 minutes
            jitter_factor: 0.1,
        }
    }
}

impl ExponentialBackoff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(base_delay_secs: u64, max_delay_secs: u64, jitter_factor: f64) -> Self {
        Self {
            base_delay_secs,
            max_delay_secs,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    pub fn from_jobs_config(config: &JobsConfig) -> Self {
        Self::with_config(
            config.retry_base_delay_secs,
            config.retry_max_delay_secs,
            config.retry_jitter_factor,
        )
    }

    /// base * 3^(attempt-1), capped at max_delay
    fn calculate_base_delay(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay_secs
            .saturating_mul(3_u64.pow(exponent))
            .min(self.max_delay_secs)
    }

    /// Add random jitter to prevent thundering herd; returns milliseconds
    fn add_jitter_ms(&self, base_delay_secs: u64) -> u64 {
        let base_delay_ms = base_delay_secs * 1000;
        let jitter_range_ms = (base_delay_ms as f64 * self.jitter_factor) as u64;

        if jitter_range_ms == 0 {
            return base_delay_ms;
        }

        base_delay_ms + rand::thread_rng().gen_range(0..=jitter_range_ms)
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32) -> Duration {
        let base_delay_secs = self.calculate_base_delay(attempt);
        Duration::from_millis(self.add_jitter_ms(base_delay_secs))
    }
}

/// Fixed delay retry strategy
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, _attempt: u32) -> Duration {
        self.delay
    }
}
