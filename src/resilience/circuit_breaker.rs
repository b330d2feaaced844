//! Per-key circuit breakers
//!
//! ```text
//! Closed --[5 consecutive failures]--> Open
//! Open --[60s since last failure]--> HalfOpen (one probe admitted)
//! HalfOpen --[probe succeeds]--> Closed
//! HalfOpen --[probe fails]--> Open (cool-down re-armed)
//! ```

use super::error::ServiceError;
use super::logging::EventLogger;
use crate::clock::{SharedClock, elapsed_between, system_clock};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Consecutive failures that open a circuit
pub const FAILURE_THRESHOLD: u32 = 5;

/// Time an open circuit waits after its last failure before admitting a probe
pub const COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitPhase::Closed => "closed",
            CircuitPhase::Open => "open",
            CircuitPhase::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct CircuitState {
    consecutive_failures: u32,
    last_failure: DateTime<Utc>,
    phase: CircuitPhase,
    probe_in_flight: bool,
}

/// Point-in-time view of one circuit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitSnapshot {
    pub key: String,
    pub phase: CircuitPhase,
    pub consecutive_failures: u32,
    pub last_failure_time: DateTime<Utc>,
}

/// Circuit states keyed by an arbitrary circuit name
#[derive(Clone)]
pub struct CircuitBreakerRegistry {
    circuits: Arc<Mutex<HashMap<String, CircuitState>>>,
    clock: SharedClock,
    logger: EventLogger,
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("circuits", &self.keys())
            .finish()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(system_clock(), EventLogger::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(clock: SharedClock, logger: EventLogger) -> Self {
        Self {
            circuits: Arc::new(Mutex::new(HashMap::new())),
            logger: logger.with_clock(clock.clone()),
            clock,
        }
    }

    /// Ask to send a call through `key`.
    ///
    /// Fails with [`ServiceError::CircuitOpen`] while the circuit is open and
    /// cooling down, or while a half-open probe is already in flight.
    pub fn try_acquire(&self, key: &str) -> Result<CircuitPermit, ServiceError> {
        let now = self.clock.now();
        let mut circuits = self.lock();

        let Some(state) = circuits.get_mut(key) else {
            return Ok(CircuitPermit::new(self.clone(), key, false));
        };

        match state.phase {
            CircuitPhase::Closed => Ok(CircuitPermit::new(self.clone(), key, false)),
            CircuitPhase::Open => {
                let since_failure = elapsed_between(state.last_failure, now);
                if since_failure >= COOLDOWN {
                    state.phase = CircuitPhase::HalfOpen;
                    state.probe_in_flight = true;
                    self.logger.log_circuit_transition(
                        key,
                        CircuitPhase::Open.as_str(),
                        CircuitPhase::HalfOpen.as_str(),
                        state.consecutive_failures,
                    );
                    Ok(CircuitPermit::new(self.clone(), key, true))
                } else {
                    self.logger.log_circuit_rejection(key, COOLDOWN - since_failure);
                    Err(ServiceError::CircuitOpen {
                        circuit: key.to_string(),
                    })
                }
            }
            CircuitPhase::HalfOpen => {
                if state.probe_in_flight {
                    self.logger.log_circuit_rejection(key, Duration::ZERO);
                    Err(ServiceError::CircuitOpen {
                        circuit: key.to_string(),
                    })
                } else {
                    state.probe_in_flight = true;
                    Ok(CircuitPermit::new(self.clone(), key, true))
                }
            }
        }
    }

    /// Close the circuit and forget its failures
    pub fn record_success(&self, key: &str) {
        let mut circuits = self.lock();
        if let Some(state) = circuits.get_mut(key) {
            if state.phase != CircuitPhase::Closed {
                self.logger.log_circuit_transition(
                    key,
                    state.phase.as_str(),
                    CircuitPhase::Closed.as_str(),
                    0,
                );
            }
            state.consecutive_failures = 0;
            state.phase = CircuitPhase::Closed;
            state.probe_in_flight = false;
        }
    }

    /// Count a failure and open the circuit once the threshold is reached
    pub fn record_failure(&self, key: &str) {
        let now = self.clock.now();
        let mut circuits = self.lock();
        let state = circuits.entry(key.to_string()).or_insert_with(|| CircuitState {
            consecutive_failures: 0,
            last_failure: now,
            phase: CircuitPhase::Closed,
            probe_in_flight: false,
        });

        state.consecutive_failures += 1;
        state.last_failure = now;
        state.probe_in_flight = false;

        if state.consecutive_failures >= FAILURE_THRESHOLD && state.phase != CircuitPhase::Open {
            self.logger.log_circuit_transition(
                key,
                state.phase.as_str(),
                CircuitPhase::Open.as_str(),
                state.consecutive_failures,
            );
            state.phase = CircuitPhase::Open;
        }
    }

    pub fn state(&self, key: &str) -> Option<CircuitSnapshot> {
        self.lock().get(key).map(|state| CircuitSnapshot {
            key: key.to_string(),
            phase: state.phase,
            consecutive_failures: state.consecutive_failures,
            last_failure_time: state.last_failure,
        })
    }

    /// Drop all state for `key`, returning it to a fresh closed circuit
    pub fn reset(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn release_probe(&self, key: &str) {
        if let Some(state) = self.lock().get_mut(key) {
            state.probe_in_flight = false;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitState>> {
        self.circuits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Admission to call through a circuit.
///
/// Settle it with [`CircuitPermit::succeed`] or [`CircuitPermit::fail`]. A
/// probe permit dropped unsettled frees the half-open slot for the next
/// caller without changing the failure count.
#[must_use = "settle the permit with succeed() or fail()"]
pub struct CircuitPermit {
    registry: CircuitBreakerRegistry,
    key: String,
    probe: bool,
    settled: bool,
}

impl CircuitPermit {
    fn new(registry: CircuitBreakerRegistry, key: &str, probe: bool) -> Self {
        Self {
            registry,
            key: key.to_string(),
            probe,
            settled: false,
        }
    }

    /// Whether this call is the single half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.settled = true;
        self.registry.record_success(&self.key);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.registry.record_failure(&self.key);
    }
}

impl Drop for CircuitPermit {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.registry.release_probe(&self.key);
        }
    }
}
