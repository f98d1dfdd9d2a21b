//! Retry with exponential backoff for transient transport failures.
//!
//! Delays double per attempt starting at the base delay and are capped at the
//! maximum delay. Sleeping uses `tokio::time`, so dropping the future cancels
//! a pending backoff and paused-clock tests run instantly.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;

use crate::config::SessionSettings;

/// Attempt budget and delay schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Randomize each delay by ±20%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    /// Connect policy described by the `session` configuration section.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            max_attempts: settings.connect_attempts.max(1),
            base_delay: Duration::from_millis(settings.backoff_base_ms),
            max_delay: Duration::from_millis(settings.backoff_max_ms),
            jitter: settings.jitter,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter && !delay.is_zero() {
            let factor = rand::rng().random_range(0.8..=1.2);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub struct RetryFailure<E> {
    /// Attempts made, including the failing one
    pub attempts: u32,
    /// Error from the last attempt
    pub error: E,
    /// True when the budget ran out, false when the error was not retryable
    pub exhausted: bool,
}

/// Runs `operation` until it succeeds, fails permanently, or the policy's
/// attempt budget is spent.
///
/// `operation` receives the 1-based attempt number.
///
/// # Errors
/// Returns a [`RetryFailure`] carrying the last error and the attempt count.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<(T, u32), RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt = attempt.saturating_add(1);
        match operation(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(error) => {
                if !is_retryable(&error) {
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                        exhausted: false,
                    });
                }
                if attempt >= max_attempts {
                    return Err(RetryFailure {
                        attempts: attempt,
                        error,
                        exhausted: true,
                    });
                }

                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %error,
                    "Attempt failed, retrying in {:?}",
                    delay
                );
                sleep(delay).await;
            }
        }
    }
}
