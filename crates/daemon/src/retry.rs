//! Retry scheduling for failed conversion attempts.
//!
//! The first attempt runs immediately. Attempt `k` (k >= 2) is delayed by
//! `base_delay * 2^(k-2)` after the previous failure, up to
//! `max_retries + 1` attempts in total.

use std::time::Duration;
use tokio::time::Instant;
use vidaud_config::Config;

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again once this instant has passed.
    RetryAt(Instant),
    /// No attempts left.
    GiveUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.max_retries, config.retry_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay between the failure of attempt `attempt - 1` and the start of
    /// `attempt` (1-based).
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        2u32.checked_pow(attempt - 2)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Delays before every attempt, starting with the immediate first one.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..=self.max_attempts()).map(|k| self.delay_before(k)).collect()
    }

    /// Decide what follows the failure of attempt number `attempts_made`.
    pub fn on_failure(&self, attempts_made: u32, failed_at: Instant) -> RetryDecision {
        if attempts_made >= self.max_attempts() {
            return RetryDecision::GiveUp;
        }
        let delay = self.delay_before(attempts_made + 1);
        match failed_at.checked_add(delay) {
            Some(wake_at) => RetryDecision::RetryAt(wake_at),
            None => RetryDecision::GiveUp,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
