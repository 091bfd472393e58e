//! Retry + circuit breaker execution.
//!
//! ```text
//! execute_resilient(op)
//!     → circuit_breaker.rs admit(dependency)
//!         Rejected → fallback(Open)
//!         Allowed/Probe → retries.rs retry(op)
//!             Ok → record_success
//!             Err → record_failure → fallback(Failed(err))
//! ```

use std::fmt;
use std::future::Future;

use crate::config::{CircuitBreakerConfig, RetryConfig};
use crate::resilience::circuit_breaker::{Admission, BreakerSnapshot, CircuitBreakers, ProbePermit};
use crate::resilience::retries::{retry, RetryContext, RetryError, RetryPolicy, Retryable};

/// Why the breaker handed a call to its fallback.
#[derive(Debug)]
pub enum BreakerRejection<E> {
    /// The circuit is open; the primary was not invoked.
    Open,
    /// The primary ran and failed.
    Failed(E),
}

/// Generic retry-with-backoff and circuit-breaker primitives.
#[derive(Debug, Clone)]
pub struct RetryCircuitExecutor {
    policy: RetryPolicy,
    breakers: CircuitBreakers,
}

impl RetryCircuitExecutor {
    pub fn new(retry: &RetryConfig, breaker: CircuitBreakerConfig) -> Self {
        Self {
            policy: RetryPolicy::from(retry),
            breakers: CircuitBreakers::new(breaker),
        }
    }

    pub fn with_policy(policy: RetryPolicy, breaker: CircuitBreakerConfig) -> Self {
        Self {
            policy,
            breakers: CircuitBreakers::new(breaker),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.snapshots()
    }

    /// Retry `op` with backoff; at most `max_attempts` invocations.
    pub async fn execute_with_retry<T, E, F, Fut>(
        &self,
        ctx: &RetryContext,
        op: F,
    ) -> Result<T, RetryError<E>>
    where
        E: Retryable + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        retry(&self.policy, ctx, op).await
    }

    /// Guard a single invocation of `op` with the breaker for `dependency`.
    pub async fn execute_with_circuit_breaker<T, E, F, Fut, FB, FutB>(
        &self,
        dependency: &str,
        op: F,
        fallback: FB,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(BreakerRejection<E>) -> FutB,
        FutB: Future<Output = Result<T, E>>,
    {
        let admission = self.breakers.admit(dependency);
        if admission == Admission::Rejected {
            tracing::debug!(dependency, "Circuit open, serving fallback");
            return fallback(BreakerRejection::Open).await;
        }

        let permit = ProbePermit::new(&self.breakers, dependency, admission);
        match op().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                fallback(BreakerRejection::Failed(e)).await
            }
        }
    }

    /// Breaker around retry: the breaker counts one failure per exhausted
    /// retry sequence, not per attempt.
    pub async fn execute_resilient<T, E, F, Fut, FB, FutB>(
        &self,
        ctx: &RetryContext,
        op: F,
        fallback: FB,
    ) -> Result<T, E>
    where
        E: Retryable + fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(BreakerRejection<E>) -> FutB,
        FutB: Future<Output = Result<T, E>>,
    {
        let dependency = ctx.dependency.as_str();
        let admission = self.breakers.admit(dependency);
        if admission == Admission::Rejected {
            tracing::debug!(dependency, operation = ctx.operation, "Circuit open, serving fallback");
            return fallback(BreakerRejection::Open).await;
        }

        // A half-open probe gets exactly one attempt.
        let policy = if admission == Admission::Probe {
            RetryPolicy::no_retry()
        } else {
            self.policy
        };

        let permit = ProbePermit::new(&self.breakers, dependency, admission);
        match retry(&policy, ctx, op).await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(RetryError::Aborted(e)) => {
                // Not a dependency failure (e.g. not found); settle as success.
                permit.success();
                Err(e)
            }
            Err(err) => {
                permit.failure();
                fallback(BreakerRejection::Failed(err.into_inner())).await
            }
        }
    }
}
