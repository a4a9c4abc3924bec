//! Resilience primitives for guarded dependency calls.
//!
//! A [`CircuitBreaker`] fails fast once a dependency has failed repeatedly,
//! and [`retry`] absorbs transient failures with exponential backoff. Both
//! report through [`GuardError`], so callers branch on the outcome kind
//! instead of inspecting error messages. They compose in either order.

pub mod backoff;
pub mod breaker;

pub use backoff::{retry, RetryPolicy};
pub use breaker::{BreakerRegistry, BreakerSettings, BreakerView, CircuitBreaker, CircuitState};

use std::time::Duration;
use thiserror::Error;

/// Outcome of a guarded call that did not produce a value.
#[derive(Error, Debug)]
pub enum GuardError {
    /// The breaker is open; the operation was not invoked.
    #[error("circuit breaker {name} is OPEN, try again in {}s", .retry_after.as_secs_f64().ceil())]
    CircuitOpen { name: String, retry_after: Duration },

    /// Every retry attempt failed.
    #[error("failed after {attempts} attempts: {source:#}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// The operation failed and was not retried.
    #[error(transparent)]
    Failed(anyhow::Error),
}

impl GuardError {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, GuardError::CircuitOpen { .. })
    }
}

impl From<anyhow::Error> for GuardError {
    fn from(error: anyhow::Error) -> Self {
        GuardError::Failed(error)
    }
}
