//! Bounded retry with a fixed inter-attempt delay.
//!
//! Every stage shares one [`RetryPolicy`] instead of carrying its own loop.
//! The delay is deliberately fixed rather than exponential: the services
//! behind these stages throttle per-request, and a steady 5-second gap is
//! what their rate limits expect. The classifier lives on
//! [`StageError::is_retryable`] — precondition and environment failures
//! escape the loop on the first attempt.

use crate::error::StageError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

/// Retry policy shared by all pipeline stages.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts are
    /// exhausted. The closure receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, StageError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        let mut last: Option<StageError> = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                sleep(self.delay).await;
            }

            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() => {
                    warn!(
                        "{what}: attempt {attempt}/{} failed — {e}",
                        self.max_attempts
                    );
                    last = Some(e);
                }
                // Precondition/environment failures cannot improve with time.
                Err(e) => return Err(e),
            }
        }

        Err(last.unwrap_or_else(|| StageError::transient(format!("{what}: no attempts made"))))
    }
}
