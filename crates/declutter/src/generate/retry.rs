//! Bounded retry with exponential backoff for generation calls.

use std::future::Future;
use std::time::Duration;

use super::GenerationError;

/// Retry schedule applied around upstream generation requests.
///
/// Only errors that [`GenerationError::is_retryable`] deems transient
/// are retried; a rate-limit response that names its own delay gets that
/// delay instead of the computed backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(8_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            // Zero attempts would mean never calling at all.
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Backoff before the attempt following failure number `attempt`
    /// (1-based): base, 2x base, 4x base, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Runs `call` until it succeeds, fails terminally, or the attempt
    /// budget is spent.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> Result<T, GenerationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && e.is_retryable() => {
                    let delay = e.retry_after().unwrap_or_else(|| self.delay_for(attempt));
                    log::warn!(
                        "{} attempt {}/{} failed ({}), retrying in {:?}",
                        operation,
                        attempt,
                        self.max_attempts,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
