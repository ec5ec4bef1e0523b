//! Retry policy with exponential backoff
//!
//! Decides whether a failed operation is worth another attempt and how
//! long to wait before it. Classification lives on
//! [`TransferError::is_retryable`]; this module owns the attempt
//! budget and delay computation.

use crate::error::TransferError;
use std::time::Duration;

/// Retry policy with exponential backoff and optional jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts
    pub max_retries: u32,
    /// Delay before the second attempt; doubles per attempt after that
    pub base_delay: Duration,
    /// Cap on the computed delay
    pub max_delay: Duration,
    /// Jitter factor (0.0 disables jitter)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy without jitter
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter_factor: 0.0,
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    ///
    /// `base * 2^(attempt-1)`, capped at `max_delay`. With a non-zero
    /// `jitter_factor` the result is spread by up to that fraction in
    /// either direction.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let base_ms = self.base_delay.as_millis() as u64;
        let scaled = base_ms.saturating_mul(1u64 << exponent);
        let capped = scaled.min(self.max_delay.as_millis() as u64);

        if self.jitter_factor > 0.0 {
            let jitter = (rand::random::<f64>() - 0.5) * 2.0 * self.jitter_factor;
            let with_jitter = (capped as f64 * (1.0 + jitter)).max(0.0) as u64;
            Duration::from_millis(with_jitter)
        } else {
            Duration::from_millis(capped)
        }
    }

    /// Whether the given failed attempt (1-based) should be retried
    pub fn should_retry(&self, attempt: u32, error: &TransferError) -> bool {
        if attempt >= self.max_retries {
            return false;
        }
        error.is_retryable()
    }
}

/// Ephemeral bookkeeping for one sequence of attempts
///
/// Scoped to a single transfer; discarded once attempts are exhausted
/// or the transfer succeeds.
#[derive(Debug, Default)]
pub struct RetryContext {
    attempt: u32,
    last_error: Option<TransferError>,
    next_delay: Option<Duration>,
}

impl RetryContext {
    /// Start a fresh sequence at attempt 1
    pub fn new() -> Self {
        Self {
            attempt: 1,
            last_error: None,
            next_delay: None,
        }
    }

    /// Current attempt number (1-based)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Error from the most recent failed attempt
    pub fn last_error(&self) -> Option<&TransferError> {
        self.last_error.as_ref()
    }

    /// Delay scheduled before the upcoming attempt
    pub fn next_delay(&self) -> Option<Duration> {
        self.next_delay
    }

    /// Record a failed attempt and advance to the next one
    pub fn record_failure(&mut self, error: TransferError, next_delay: Duration) {
        self.last_error = Some(error);
        self.next_delay = Some(next_delay);
        self.attempt += 1;
    }
}
