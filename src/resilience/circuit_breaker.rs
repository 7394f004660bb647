//! Named circuit breakers with lazy state transitions.
//!
//! Circuits are created on first use and move through
//! `Closed -> Open -> HalfOpen -> Closed`. There is no timer: an open circuit is
//! promoted to half-open by the first `is_circuit_open` call made after the reset
//! timeout has elapsed.

use crate::core::config::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

#[derive(Debug, Clone)]
struct CircuitState {
    failures: u32,
    state: BreakerState,
    last_failure: Option<Instant>,
    last_state_change: Instant,
}

impl CircuitState {
    fn new(now: Instant) -> Self {
        Self {
            failures: 0,
            state: BreakerState::Closed,
            last_failure: None,
            last_state_change: now,
        }
    }

    fn last_activity(&self) -> Instant {
        match self.last_failure {
            Some(at) if at > self.last_state_change => at,
            _ => self.last_state_change,
        }
    }
}

/// Point-in-time view of one circuit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub name: String,
    pub state: BreakerState,
    pub failures: u32,
    /// Time since the last recorded failure
    pub since_last_failure: Option<Duration>,
}

struct Registry {
    circuits: HashMap<String, CircuitState>,
    last_gc: Instant,
}

pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    inner: Mutex<Registry>,
}

impl fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("config", &self.config)
            .field("circuits", &self.inner.lock().circuits.len())
            .finish()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Registry {
                circuits: HashMap::new(),
                last_gc: Instant::now(),
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// `true` while calls through `name` must be rejected.
    ///
    /// An open circuit whose reset timeout has elapsed is moved to half-open and
    /// reported as not open so one trial call can go through.
    pub fn is_circuit_open(&self, name: &str) -> bool {
        self.is_circuit_open_at(name, Instant::now())
    }

    pub(crate) fn is_circuit_open_at(&self, name: &str, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        self.maybe_collect(&mut inner, now);

        let Some(circuit) = inner.circuits.get_mut(name) else {
            return false;
        };

        match circuit.state {
            BreakerState::Closed | BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let opened_for = now.saturating_duration_since(circuit.last_state_change);
                if opened_for > self.config.reset_timeout() {
                    circuit.state = BreakerState::HalfOpen;
                    circuit.last_state_change = now;
                    info!(circuit = name, "circuit half-open, allowing trial call");
                    false
                } else {
                    true
                }
            }
        }
    }

    pub fn record_success(&self, name: &str) {
        self.record_success_at(name, Instant::now());
    }

    pub(crate) fn record_success_at(&self, name: &str, now: Instant) {
        let mut inner = self.inner.lock();
        let circuit = inner
            .circuits
            .entry(name.to_string())
            .or_insert_with(|| CircuitState::new(now));

        match circuit.state {
            BreakerState::HalfOpen => {
                circuit.state = BreakerState::Closed;
                circuit.failures = 0;
                circuit.last_state_change = now;
                info!(circuit = name, "circuit closed after successful trial");
            }
            BreakerState::Closed => {
                circuit.failures = 0;
            }
            // A late success from a call started before the circuit opened
            BreakerState::Open => {
                debug!(circuit = name, "success recorded while open, ignoring");
            }
        }
    }

    pub fn record_failure(&self, name: &str) {
        self.record_failure_at(name, Instant::now());
    }

    pub(crate) fn record_failure_at(&self, name: &str, now: Instant) {
        let threshold = self.config.failure_threshold;
        let mut inner = self.inner.lock();
        let circuit = inner
            .circuits
            .entry(name.to_string())
            .or_insert_with(|| CircuitState::new(now));

        circuit.last_failure = Some(now);

        match circuit.state {
            BreakerState::HalfOpen => {
                circuit.state = BreakerState::Open;
                circuit.failures = threshold;
                circuit.last_state_change = now;
                warn!(circuit = name, "trial call failed, circuit re-opened");
            }
            BreakerState::Closed => {
                circuit.failures = circuit.failures.saturating_add(1);
                if circuit.failures >= threshold {
                    circuit.state = BreakerState::Open;
                    circuit.last_state_change = now;
                    warn!(
                        circuit = name,
                        failures = circuit.failures,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
            BreakerState::Open => {
                circuit.failures = circuit.failures.saturating_add(1);
            }
        }
    }

    /// Current state without applying the lazy open -> half-open transition
    pub fn state(&self, name: &str) -> Option<BreakerState> {
        self.inner.lock().circuits.get(name).map(|c| c.state)
    }

    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let mut snapshots: Vec<CircuitSnapshot> = inner
            .circuits
            .iter()
            .map(|(name, c)| CircuitSnapshot {
                name: name.clone(),
                state: c.state,
                failures: c.failures,
                since_last_failure: c.last_failure.map(|at| now.saturating_duration_since(at)),
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Force a circuit back to closed
    pub fn reset(&self, name: &str) {
        let now = Instant::now();
        if let Some(circuit) = self.inner.lock().circuits.get_mut(name) {
            *circuit = CircuitState::new(now);
            info!(circuit = name, "circuit manually reset");
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().circuits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop healthy circuits idle for longer than `idle_retention`
    pub fn collect_idle(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        self.collect_idle_locked(&mut inner, now)
    }

    fn maybe_collect(&self, inner: &mut Registry, now: Instant) {
        if now.saturating_duration_since(inner.last_gc) >= self.config.gc_interval() {
            self.collect_idle_locked(inner, now);
        }
    }

    fn collect_idle_locked(&self, inner: &mut Registry, now: Instant) -> usize {
        let retention = self.config.idle_retention();
        let before = inner.circuits.len();
        inner.circuits.retain(|_, c| {
            !(c.state == BreakerState::Closed
                && c.failures == 0
                && now.saturating_duration_since(c.last_activity()) > retention)
        });
        inner.last_gc = now;
        let removed = before - inner.circuits.len();
        if removed > 0 {
            debug!(removed, remaining = inner.circuits.len(), "collected idle circuits");
        }
        removed
    }
}
