use std::future::Future;
use std::time::Duration;

use crate::config::ModerationConfig;

/// Errors that can tell whether a retry might succeed.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Bounded retry with linear backoff: the n-th retry waits `base_delay * n`.
/// Only transient errors are retried; anything else is returned immediately.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&ModerationConfig> for RetryPolicy {
    fn from(config: &ModerationConfig) -> Self {
        Self {
            attempts: config.retry_attempts.max(1),
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    pub async fn run<F, Fut, T, E>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Transient + std::fmt::Display,
    {
        let mut attempt = 1;

        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} hit a transient error (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt,
                        self.attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!("{} failed after {} attempt(s): {}", operation, attempt, e);
                    return Err(e);
                }
            }
        }
    }
}
