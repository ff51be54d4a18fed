use std::time::Duration;

use serde::Deserialize;

/// Exponential backoff policy for raw page retrieval.
///
/// `max_retries` counts attempts, not re-attempts: a value of 3 means the
/// request is tried at most three times.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Delay to wait before performing `attempt` (zero-based).
    ///
    /// Attempt 0 never waits. Later attempts wait
    /// `min(base * factor^attempt, max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let max = self.max_delay();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.base_delay().as_secs_f64() * self.backoff_factor.powi(exponent);

        // Overflow, NaN and negative factors all collapse onto the ceiling or zero.
        if !scaled.is_finite() || scaled >= max.as_secs_f64() {
            return max;
        }
        if scaled <= 0.0 {
            return Duration::ZERO;
        }

        Duration::from_secs_f64(scaled)
    }

    /// Worst-case total wait before giving up on a source.
    pub fn total_backoff(&self) -> Duration {
        (1..self.max_retries)
            .map(|attempt| self.delay_for_attempt(attempt))
            .sum()
    }
}
