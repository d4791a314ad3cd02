//! Retry handler for activity calls.
//!
//! Stateless: all decisions are associated functions that take the
//! [`RetryPolicy`] as a parameter. Attempts are 1-based.

use std::time::Duration;

use snacktopus_types::workflow::RetryPolicy;

use super::error::ActivityError;

pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt should follow a failed `attempt`.
    ///
    /// False once `max_attempts` is reached, for non-retryable errors, and
    /// when waiting for the next attempt would exceed the policy's overall
    /// `retry_timeout_ms` measured from the first attempt.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32, error: &ActivityError, elapsed: Duration) -> bool {
        if attempt >= policy.max_attempts || !error.is_retryable() {
            return false;
        }
        match policy.retry_timeout_ms {
            Some(budget_ms) => {
                let next_start = elapsed + Self::delay(policy, attempt);
                next_start <= Duration::from_millis(budget_ms)
            }
            None => true,
        }
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        policy.delay_after(attempt)
    }
}
