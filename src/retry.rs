//! Retry policy for provider calls with exponential backoff.
//!
//! Transient failures are retried:
//! - Timeouts and connection errors
//! - 5xx server errors
//! - 408 Request Timeout and 429 Too Many Requests
//!
//! Everything else fails fast:
//! - Other 4xx client errors (invalid key, unknown city, ...)
//! - Requests that could not be built

use std::time::Duration;

use reqwest::StatusCode;

// ---

/// Retry configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; at most `max_retries + 1` requests.
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each later one.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay: max_delay.max(initial_delay),
        }
    }

    /// Delay before retry number `retry` (0-based): `initial_delay * 2^retry`,
    /// capped at `max_delay`. Non-decreasing in `retry`.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        // ---
        let factor = 2u32.saturating_pow(retry);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Every delay this policy will wait, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_retries).map(|retry| self.delay_for_retry(retry))
    }
}

/// Error classification for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

/// Classify a transport-level error from `reqwest`.
pub fn classify_error(error: &reqwest::Error) -> RetryDecision {
    // ---
    if error.is_builder() {
        return RetryDecision::NoRetry;
    }
    if let Some(status) = error.status() {
        return classify_status(status);
    }
    // Timeouts, refused/reset connections and truncated bodies.
    RetryDecision::Retry
}

/// Classify a non-success HTTP status.
pub fn classify_status(status: StatusCode) -> RetryDecision {
    // ---
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        return RetryDecision::Retry;
    }
    RetryDecision::NoRetry
}
