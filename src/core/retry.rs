//! Fixed-delay bounded retry.
//!
//! Two policies are in use:
//!
//! - [`RetryConfig::DELIVERY`]: 4 attempts, 5s apart. Webhook delivery and
//!   transient chat-service failures.
//! - [`RetryConfig::RATE_LIMIT`]: 10 attempts with a 30s cool-down. Only for
//!   rate-limit rejections, where the same call is repeated unchanged.
//!
//! Which errors are worth another attempt is decided by the caller's
//! predicate; anything else aborts immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl RetryConfig {
    pub const DELIVERY: Self = Self {
        max_attempts: 4,
        delay: Duration::from_secs(5),
    };

    pub const RATE_LIMIT: Self = Self {
        max_attempts: 10,
        delay: Duration::from_secs(30),
    };

    #[cfg(test)]
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("gave up after {attempts} attempts: {last_error}")]
    Exhausted { last_error: E, attempts: u32 },
    #[error("{0}")]
    Aborted(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Aborted(e) => e,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            RetryError::Exhausted { last_error, .. } => last_error,
            RetryError::Aborted(e) => e,
        }
    }
}

/// Lets an error stretch the pause before the next attempt (e.g. `Retry-After`).
pub trait RetryHint {
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

// Nested retries keep the innermost hint.
impl<E: RetryHint> RetryHint for RetryError<E> {
    fn retry_after(&self) -> Option<Duration> {
        self.inner().retry_after()
    }
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` is reached.
pub async fn retry<T, E, F, Fut, P>(
    config: RetryConfig,
    is_retryable: P,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display + RetryHint,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if !is_retryable(&e) => return Err(RetryError::Aborted(e)),
            Err(e) if attempt >= max_attempts => {
                error!("Giving up after {} attempts: {}", attempt, e);
                return Err(RetryError::Exhausted {
                    last_error: e,
                    attempts: attempt,
                });
            }
            Err(e) => {
                let wait = e
                    .retry_after()
                    .map_or(config.delay, |hint| hint.max(config.delay));
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, max_attempts, e, wait
                );
                tokio::time::sleep(wait).await;
            }
        }
    }
}
