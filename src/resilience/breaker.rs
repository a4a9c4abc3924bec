//! Per-dependency circuit breakers.
//!
//! ```text
//! CLOSED --failures >= threshold--> OPEN --reset timeout elapsed--> HALF_OPEN
//! HALF_OPEN --success--> CLOSED
//! HALF_OPEN --failure--> OPEN (cooldown restarts from the new failure)
//! ```
//!
//! Only one probe runs while HALF_OPEN; concurrent callers fail fast until
//! it resolves. A probe that is dropped before resolving frees the slot.
//!
//! Breaker state lives in a [`BreakerRegistry`] keyed by name, so every
//! handle created with the same name observes and mutates the same state.
//! The registry is an explicit object: the process builds one and hands it
//! to whoever needs a breaker; tests build their own.

use super::GuardError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls fail fast until the reset timeout elapses.
    Open,
    /// A probe call is allowed through to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Thresholds for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open after the latest failure.
    #[serde(rename = "reset_timeout_secs", with = "secs")]
    pub reset_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    state: CircuitState,
    probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            consecutive_failures: 0,
            last_failure: None,
            state: CircuitState::Closed,
            probe_in_flight: false,
        }
    }
}

/// Read-only view of a breaker, for health reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerView {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Seconds since the most recent failure, if any.
    pub seconds_since_failure: Option<u64>,
}

/// Process-wide map from breaker name to its state.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    states: Mutex<HashMap<String, BreakerState>>,
}

impl BreakerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Get a handle to the breaker called `name`, creating its state on
    /// first use.
    pub fn breaker(self: &Arc<Self>, name: &str, settings: BreakerSettings) -> CircuitBreaker {
        self.lock()
            .entry(name.to_string())
            .or_insert_with(BreakerState::new);

        CircuitBreaker {
            name: name.to_string(),
            settings,
            registry: Arc::clone(self),
        }
    }

    /// Snapshot of every known breaker, sorted by name.
    pub fn views(&self) -> Vec<BreakerView> {
        let now = Instant::now();
        let mut views: Vec<BreakerView> = self
            .lock()
            .iter()
            .map(|(name, state)| BreakerView {
                name: name.clone(),
                state: state.state,
                consecutive_failures: state.consecutive_failures,
                seconds_since_failure: state
                    .last_failure
                    .map(|at| now.saturating_duration_since(at).as_secs()),
            })
            .collect();
        views.sort_by(|a, b| a.name.cmp(&b.name));
        views
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BreakerState>> {
        // State stays consistent even if a holder panicked: every update is
        // a single assignment.
        self.states.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to a named breaker in a [`BreakerRegistry`].
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: String,
    settings: BreakerSettings,
    registry: Arc<BreakerRegistry>,
}

impl CircuitBreaker {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, without triggering any transition.
    pub fn state(&self) -> CircuitState {
        self.with_state(|state| state.state)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.with_state(|state| state.consecutive_failures)
    }

    /// Run `op` through the breaker.
    ///
    /// While open and cooling down, or while another HALF_OPEN probe is in
    /// flight, returns [`GuardError::CircuitOpen`] without invoking `op`. Otherwise `op` runs once and its outcome
    /// updates the breaker; failures are passed back unchanged.
    pub async fn call<T, E, F, Fut>(&self, op: F) -> Result<T, GuardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<GuardError>,
    {
        let probe = self.admit()?;
        let _slot = ProbeSlot {
            breaker: self,
            armed: probe,
        };

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(e.into())
            }
        }
    }

    /// Returns whether the admitted call is the HALF_OPEN probe.
    fn admit(&self) -> Result<bool, GuardError> {
        let reset_timeout = self.settings.reset_timeout;
        self.with_state(|state| {
            match state.state {
                CircuitState::Closed => return Ok(false),
                CircuitState::HalfOpen if state.probe_in_flight => {
                    return Err(GuardError::CircuitOpen {
                        name: self.name.clone(),
                        retry_after: reset_timeout,
                    });
                }
                CircuitState::HalfOpen => {
                    state.probe_in_flight = true;
                    return Ok(true);
                }
                CircuitState::Open => {}
            }

            let elapsed = state
                .last_failure
                .map(|at| at.elapsed())
                .unwrap_or(reset_timeout);

            if elapsed < reset_timeout {
                return Err(GuardError::CircuitOpen {
                    name: self.name.clone(),
                    retry_after: reset_timeout - elapsed,
                });
            }

            state.state = CircuitState::HalfOpen;
            state.probe_in_flight = true;
            info!("Circuit breaker {} moved to HALF_OPEN", self.name);
            Ok(true)
        })
    }

    fn on_success(&self) {
        self.with_state(|state| {
            if state.consecutive_failures > 0 || state.state != CircuitState::Closed {
                info!("Circuit breaker {} reset after success", self.name);
            }
            state.consecutive_failures = 0;
            state.state = CircuitState::Closed;
            state.probe_in_flight = false;
        });
    }

    fn on_failure(&self) {
        let threshold = self.settings.failure_threshold;
        self.with_state(|state| {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.last_failure = Some(Instant::now());
            state.probe_in_flight = false;

            if state.consecutive_failures >= threshold {
                if state.state != CircuitState::Open {
                    warn!(
                        "Circuit breaker {} OPENED after {} failures",
                        self.name, state.consecutive_failures
                    );
                }
                state.state = CircuitState::Open;
            }
        });
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut BreakerState) -> R) -> R {
        let mut states = self.registry.lock();
        let state = states
            .entry(self.name.clone())
            .or_insert_with(BreakerState::new);
        f(state)
    }
}

/// Releases the HALF_OPEN probe slot when the probe ends, including when
/// its future is dropped mid-flight.
struct ProbeSlot<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for ProbeSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker
                .with_state(|state| state.probe_in_flight = false);
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
