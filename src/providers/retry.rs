//! Bounded exponential-backoff retry for provider calls.
//!
//! Only errors a provider classifies as transient (timeouts, 5xx) are
//! retried; everything else propagates immediately.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdapterError {
    /// Safe to retry: network timeout, provider 5xx, rate limiting.
    #[error("transient provider error: {0}")]
    Transient(String),
    /// Never retried: bad request, auth failure, validation error.
    #[error("provider error: {0}")]
    Fatal(String),
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Policy with no sleeping, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retrying after the given zero-based attempt:
    /// base × 2^attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Run `op` with retries per the policy. The closure receives the
/// zero-based attempt number.
pub fn with_retry<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T, AdapterError>
where
    F: FnMut(u32) -> Result<T, AdapterError>,
{
    let mut last_err = None;
    for attempt in 0..=policy.max_retries {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(AdapterError::Transient(msg)) => {
                tracing::warn!(attempt, "transient provider error, will retry: {}", msg);
                last_err = Some(AdapterError::Transient(msg));
                if attempt < policy.max_retries {
                    let delay = policy.delay_for(attempt);
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
            }
            Err(fatal @ AdapterError::Fatal(_)) => return Err(fatal),
        }
    }
    // max_retries + 1 attempts all failed transiently
    Err(last_err.unwrap_or_else(|| AdapterError::Transient("retries exhausted".into())))
}
