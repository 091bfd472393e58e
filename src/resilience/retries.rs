//! Retry logic.
//!
//! # Responsibilities
//! - Decide whether a failure is worth another attempt
//! - Re-invoke an operation with exponential backoff + jitter
//! - Surface a typed failure once attempts are exhausted
//!
//! # Design Decisions
//! - The operation is never invoked again after it succeeds
//! - Non-retryable failures (not found, invalid input) stop immediately
//! - Writes go through retries too; they are never faked from cache

use std::fmt;
use std::future::Future;

use thiserror::Error;

use crate::config::RetryConfig;
use crate::observability::metrics;
use crate::resilience::backoff::ExponentialBackoff;

/// Failures that know whether another attempt could help.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Attempt count and backoff schedule for one call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: ExponentialBackoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: ExponentialBackoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt, no retries.
    pub fn no_retry() -> Self {
        Self::new(1, ExponentialBackoff::from_millis(0, 0))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            ExponentialBackoff::from_millis(config.base_delay_ms, config.max_delay_ms),
        )
    }
}

/// Diagnostics carried through a retried call.
#[derive(Debug, Clone)]
pub struct RetryContext {
    pub dependency: String,
    pub operation: &'static str,
    pub entity_id: Option<String>,
}

impl RetryContext {
    pub fn new(dependency: impl Into<String>, operation: &'static str) -> Self {
        Self {
            dependency: dependency.into(),
            operation,
            entity_id: None,
        }
    }

    pub fn with_entity(mut self, id: impl fmt::Display) -> Self {
        self.entity_id = Some(id.to_string());
        self
    }
}

/// Why a retried call gave up.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    Exhausted {
        operation: &'static str,
        attempts: u32,
        last: E,
    },

    /// A non-retryable error ended the loop early.
    #[error("{0}")]
    Aborted(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::Aborted(e) => e,
        }
    }
}

/// Invoke `op` until it succeeds, fails non-retryably, or attempts run out.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    ctx: &RetryContext,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Retryable + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(RetryError::Aborted(e)),
            Err(e) if attempt >= policy.max_attempts => {
                tracing::warn!(
                    dependency = %ctx.dependency,
                    operation = ctx.operation,
                    entity_id = ?ctx.entity_id,
                    attempts = attempt,
                    error = %e,
                    "Retries exhausted"
                );
                return Err(RetryError::Exhausted {
                    operation: ctx.operation,
                    attempts: attempt,
                    last: e,
                });
            }
            Err(e) => {
                let delay = policy.backoff.delay(attempt);
                tracing::debug!(
                    dependency = %ctx.dependency,
                    operation = ctx.operation,
                    entity_id = ?ctx.entity_id,
                    attempt,
                    delay = ?delay,
                    error = %e,
                    "Retrying operation"
                );
                metrics::record_retry(&ctx.dependency);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct Flaky(bool);

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky(retryable={})", self.0)
        }
    }

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    fn policy(max: u32) -> RetryPolicy {
        RetryPolicy::new(max, ExponentialBackoff::from_millis(10, 100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_success() {
        let calls = &AtomicU32::new(0);
        let ctx = RetryContext::new("database", "get_user");
        let result: Result<u32, RetryError<Flaky>> = retry(&policy(5), &ctx, || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 2 { Err(Flaky(true)) } else { Ok(n) }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded() {
        let calls = &AtomicU32::new(0);
        let ctx = RetryContext::new("database", "get_user").with_entity("u1");
        let result: Result<(), RetryError<Flaky>> = retry(&policy(3), &ctx, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(true))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_aborts() {
        let calls = &AtomicU32::new(0);
        let ctx = RetryContext::new("database", "get_user");
        let result: Result<(), RetryError<Flaky>> = retry(&policy(3), &ctx, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Flaky(false))
        })
        .await;

        assert!(matches!(result, Err(RetryError::Aborted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
