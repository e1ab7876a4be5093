use std::future::Future;
use std::time::Duration;

use timegate_core::constants::{READ_RETRY_ATTEMPTS, READ_RETRY_BACKOFF_MS};
use timegate_core::error::TimegateError;
use tracing::warn;

/// Bounded exponential backoff for idempotent reads.
///
/// Only errors with [`TimegateError::is_retryable`] are retried. State-changing
/// calls never go through here.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: READ_RETRY_ATTEMPTS,
            initial_backoff: Duration::from_millis(READ_RETRY_BACKOFF_MS),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self { max_attempts, initial_backoff: Duration::ZERO, max_backoff: Duration::ZERO }
    }

    /// Backoff before retry number `attempt` (0-indexed).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }

    pub async fn read<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, TimegateError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TimegateError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt + 1 < self.max_attempts => {
                    let backoff = self.backoff_for_attempt(attempt);
                    warn!(read = what, attempt = attempt + 1, error = %e, ?backoff, "retrying read");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
