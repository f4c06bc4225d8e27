//! Bounded exponential backoff.

use crate::error::RetryError;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// Wait after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on any wait.
    pub max_delay: Duration,
    /// Factor applied to the wait after each failure.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Calls `op` until it succeeds, attempts run out, or `cancel` fires.
///
/// # Errors
///
/// Returns [`RetryError::MaxAttemptsReached`] with the last error once every
/// attempt failed, or [`RetryError::Cancelled`] if the token fires during a
/// wait.
pub async fn retry<T, E, F, Fut>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 1;

    loop {
        let last_error = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        warn!(attempt, max_attempts, error = %last_error, "retry attempt failed");

        if attempt >= max_attempts {
            return Err(RetryError::MaxAttemptsReached {
                attempts: attempt,
                last_error,
            });
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RetryError::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
        delay = config.next_delay(delay);
        attempt += 1;
    }
}
