use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Errors that know whether trying again could help.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Bounded retry for upstream calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between attempts. Zero retries immediately.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::ZERO,
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },
    #[error(transparent)]
    Permanent(E),
}

impl RetryPolicy {
    /// Run `operation` until it succeeds, fails permanently, or the attempt
    /// budget is spent.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, RetryError<E>>
    where
        E: Transient + std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(RetryError::Permanent(e)),
                Err(e) if attempt >= max_attempts => {
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: e,
                    });
                }
                Err(e) => {
                    debug!(
                        operation = what,
                        attempt,
                        max_attempts,
                        error = %e,
                        "retrying"
                    );
                    if !self.backoff.is_zero() {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
            }
        }
    }
}
