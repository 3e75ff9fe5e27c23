//! Retry decisions and exponential backoff

use crate::config::CollectorConfig;
use crate::pipeline::fetcher::FetchOutcome;
use std::time::Duration;

/// Decides whether and when a failed attempt is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay(),
            max_backoff: config.max_backoff(),
        }
    }

    pub fn should_retry(&self, attempt_number: u32, outcome: &FetchOutcome) -> bool {
        should_retry(attempt_number, outcome, self.max_retries)
    }

    /// Wait before the attempt following `attempt_number`
    ///
    /// A `Retry-After` hint longer than the computed backoff wins, but never
    /// beyond `max_backoff`.
    pub fn delay_for(&self, attempt_number: u32, outcome: &FetchOutcome) -> Duration {
        let backoff = backoff_duration(attempt_number, self.base_delay, self.max_backoff);

        match outcome {
            FetchOutcome::TransientFailure {
                retry_after: Some(hint),
                ..
            } => backoff.max((*hint).min(self.max_backoff)),
            _ => backoff,
        }
    }
}

/// Only transient failures are retried, and only while
/// `attempt_number <= max_retries`
///
/// With `max_retries = 3` a target gets at most four attempts.
pub fn should_retry(attempt_number: u32, outcome: &FetchOutcome, max_retries: u32) -> bool {
    outcome.is_transient() && attempt_number <= max_retries
}

/// `base_delay * 2^(attempt_number - 1)`, capped at `cap`
pub fn backoff_duration(attempt_number: u32, base_delay: Duration, cap: Duration) -> Duration {
    let exponent = attempt_number.saturating_sub(1).min(31);
    base_delay
        .checked_mul(1u32 << exponent)
        .map_or(cap, |d| d.min(cap))
}
