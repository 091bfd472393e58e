//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a dependency:
//!     → circuit_breaker.rs (skip the call entirely while open)
//!     → retries.rs (retry retryable failures with backoff.rs delays)
//!     → circuit_breaker.rs (track failures, open circuit at threshold)
//!     → fallback on rejection or exhausted retries
//!
//! Recovery work:
//!     → timeouts.rs (every strategy runs under an explicit budget)
//! ```
//!
//! # Design Decisions
//! - Breakers are per dependency, never global
//! - Fail fast in Open state (no waiting on a dead dependency)
//! - Single probe in Half-Open (no hammering a recovering dependency)
//! - Jittered backoff prevents synchronized retry storms

pub mod backoff;
pub mod circuit_breaker;
pub mod executor;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreakers, CircuitState};
pub use executor::{BreakerRejection, RetryCircuitExecutor};
pub use retries::{RetryContext, RetryError, RetryPolicy, Retryable};
pub use timeouts::{within_budget, BudgetExceeded};
