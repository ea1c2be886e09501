//! Retry policy shared by every page fetch.

use std::time::Duration;

use super::FetchCause;
use crate::config::{DEFAULT_BACKOFF_FACTOR, DEFAULT_MAX_RETRIES};

/// Statuses worth another attempt: throttling and transient server errors.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    /// Seconds. Retry `n` (0-based) waits `backoff_factor * 2^n`.
    backoff_factor: f64,
    retryable_statuses: Vec<u16>,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF_FACTOR)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor: if backoff_factor.is_finite() {
                backoff_factor.max(0.0)
            } else {
                0.0
            },
            retryable_statuses: RETRYABLE_STATUSES.to_vec(),
            jitter: false,
        }
    }

    /// Stretch each delay to somewhere in `[d, 1.5d)` so concurrent workers do
    /// not retry in lockstep. The unjittered schedule stays the minimum.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_retryable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retryable_statuses = statuses.into_iter().collect();
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn is_retryable(&self, cause: &FetchCause) -> bool {
        match cause {
            FetchCause::Status(code) => self.retryable_statuses.contains(code),
            other => other.is_transient(),
        }
    }

    /// Whether to try again after `retry` retries have already been spent.
    pub fn should_retry(&self, retry: u32, cause: &FetchCause) -> bool {
        retry < self.max_retries && self.is_retryable(cause)
    }

    /// Delay before retry `retry` (0-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let secs = self.backoff_factor * 2f64.powi(retry.min(30) as i32);
        let delay = Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        delay + (delay / 2).mul_f64(fastrand::f64())
    }
}
