//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: upstream assumed down, calls fail fast without network I/O
//! - Half-Open: one trial call decides whether the upstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive_failures >= failure_threshold
//! Open → Half-Open: first call after reset_timeout has elapsed
//! Half-Open → Closed: trial call succeeds
//! Half-Open → Open: trial call fails (opened_at restarts)
//! ```
//!
//! # Design Decisions
//! - Per-upstream circuit breaker (not global), created on first use
//! - Fail fast in Open state (no waiting for timeout)
//! - Single trial call in Half-Open
//! - No retries here; retry policy belongs to the caller
//! - Each opening starts a new generation; outcomes of calls admitted in an
//!   earlier generation are ignored

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

use crate::clock::{SharedClock, SystemClock};
use crate::config::BreakerConfig;
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;

/// Circuit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    fn as_str(self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a guarded call did not produce a value.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Circuit is open (or a half-open trial is already running).
    #[error("circuit open for upstream '{upstream}'")]
    Open { upstream: String },

    /// The operation exceeded its deadline.
    #[error("upstream '{upstream}' timed out after {}ms", .timeout.as_millis())]
    Timeout { upstream: String, timeout: Duration },

    /// The operation itself returned an error.
    #[error("upstream call failed: {0}")]
    Failed(E),
}

impl<E> BreakerError<E> {
    /// True when the call was never attempted.
    pub fn is_short_circuit(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

/// Mutable state of one circuit.
#[derive(Debug)]
struct CircuitState {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_utc: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    generation: u64,
}

impl CircuitState {
    fn new() -> Self {
        Self {
            status: CircuitStatus::Closed,
            consecutive_failures: 0,
            opened_at: None,
            opened_at_utc: None,
            trial_in_flight: false,
            generation: 0,
        }
    }
}

/// Point-in-time view of a circuit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub name: String,
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
}

type Circuit = Arc<Mutex<CircuitState>>;

fn lock(circuit: &Circuit) -> MutexGuard<'_, CircuitState> {
    // State transitions never panic mid-update, so a poisoned lock still holds a consistent state.
    circuit.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of per-upstream circuit breakers.
///
/// Transitions happen under a per-circuit mutex that is never held across
/// an await point.
#[derive(Clone)]
pub struct BreakerRegistry {
    circuits: Arc<DashMap<String, Circuit>>,
    failure_threshold: u32,
    reset_timeout: Duration,
    clock: SharedClock,
}

impl BreakerRegistry {
    pub fn new(config: &BreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &BreakerConfig, clock: SharedClock) -> Self {
        Self {
            circuits: Arc::new(DashMap::new()),
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            clock,
        }
    }

    fn circuit(&self, name: &str) -> Circuit {
        if let Some(existing) = self.circuits.get(name) {
            return existing.clone();
        }
        self.circuits
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CircuitState::new())))
            .clone()
    }

    /// Run `operation` through the breaker for `upstream`.
    ///
    /// Errors and timeouts from the operation count as failures. When the
    /// circuit rejects the call the operation is never invoked.
    pub async fn execute<T, E, F, Fut>(
        &self,
        upstream: &str,
        timeout: Duration,
        operation: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.acquire(upstream) else {
            metrics::record_upstream_call(upstream, "short_circuit");
            tracing::debug!(upstream = %upstream, "Circuit open, short-circuiting call");
            return Err(BreakerError::Open {
                upstream: upstream.to_string(),
            });
        };

        match with_timeout(timeout, operation()).await {
            Ok(Ok(value)) => {
                permit.succeed();
                metrics::record_upstream_call(upstream, "success");
                Ok(value)
            }
            Ok(Err(e)) => {
                permit.fail();
                metrics::record_upstream_call(upstream, "error");
                Err(BreakerError::Failed(e))
            }
            Err(_) => {
                permit.fail();
                metrics::record_upstream_call(upstream, "timeout");
                Err(BreakerError::Timeout {
                    upstream: upstream.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Like [`execute`](Self::execute) but yields `fallback` on any failure.
    pub async fn execute_or<T, E, F, Fut>(
        &self,
        upstream: &str,
        timeout: Duration,
        operation: F,
        fallback: T,
    ) -> T
    where
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.execute(upstream, timeout, operation).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(upstream = %upstream, error = %e, "Using fallback value");
                fallback
            }
        }
    }

    /// Ask to make a call. `None` means short-circuit.
    pub fn acquire(&self, upstream: &str) -> Option<CallPermit> {
        let circuit = self.circuit(upstream);
        let (trial, generation) = {
            let mut state = lock(&circuit);
            let trial = match state.status {
                CircuitStatus::Closed => false,
                CircuitStatus::Open => {
                    let elapsed = state
                        .opened_at
                        .map(|at| self.clock.now().saturating_duration_since(at))
                        .unwrap_or_default();
                    if elapsed < self.reset_timeout {
                        return None;
                    }
                    state.status = CircuitStatus::HalfOpen;
                    state.trial_in_flight = true;
                    tracing::info!(upstream = %upstream, "Circuit half-open, admitting trial call");
                    metrics::record_circuit_transition(upstream, "half_open");
                    true
                }
                CircuitStatus::HalfOpen => {
                    if state.trial_in_flight {
                        return None;
                    }
                    state.trial_in_flight = true;
                    true
                }
            };
            (trial, state.generation)
        };

        Some(CallPermit {
            registry: self.clone(),
            upstream: upstream.to_string(),
            circuit,
            trial,
            generation,
            resolved: false,
        })
    }

    fn on_success(&self, upstream: &str, state: &mut CircuitState) {
        state.consecutive_failures = 0;
        match state.status {
            CircuitStatus::Closed | CircuitStatus::Open => {}
            CircuitStatus::HalfOpen => {
                state.status = CircuitStatus::Closed;
                state.opened_at = None;
                state.opened_at_utc = None;
                state.trial_in_flight = false;
                tracing::info!(upstream = %upstream, "Circuit closed, upstream recovered");
                metrics::record_circuit_transition(upstream, "closed");
            }
        }
    }

    fn on_failure(&self, upstream: &str, state: &mut CircuitState) {
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        match state.status {
            CircuitStatus::Closed => {
                if state.consecutive_failures >= self.failure_threshold {
                    self.open(upstream, state);
                }
            }
            CircuitStatus::HalfOpen => {
                state.trial_in_flight = false;
                self.open(upstream, state);
            }
            CircuitStatus::Open => {}
        }
    }

    fn open(&self, upstream: &str, state: &mut CircuitState) {
        state.status = CircuitStatus::Open;
        state.generation = state.generation.wrapping_add(1);
        state.opened_at = Some(self.clock.now());
        state.opened_at_utc = Some(self.clock.now_utc());
        tracing::warn!(
            upstream = %upstream,
            failures = state.consecutive_failures,
            reset_timeout_secs = self.reset_timeout.as_secs(),
            "Circuit opened"
        );
        metrics::record_circuit_transition(upstream, "open");
    }

    /// Current status, `Closed` for names never seen.
    pub fn status(&self, upstream: &str) -> CircuitStatus {
        self.circuits
            .get(upstream)
            .map(|c| {
                let status = lock(&c).status;
                status
            })
            .unwrap_or(CircuitStatus::Closed)
    }

    pub fn snapshot(&self, upstream: &str) -> Option<CircuitSnapshot> {
        self.circuits
            .get(upstream)
            .map(|c| self.snapshot_of(upstream, &c))
    }

    /// Snapshots of every known circuit, sorted by name.
    pub fn snapshots(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<_> = self
            .circuits
            .iter()
            .map(|entry| self.snapshot_of(entry.key(), entry.value()))
            .collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    fn snapshot_of(&self, name: &str, circuit: &Circuit) -> CircuitSnapshot {
        let state = lock(circuit);
        CircuitSnapshot {
            name: name.to_string(),
            status: state.status,
            consecutive_failures: state.consecutive_failures,
            opened_at: state.opened_at_utc,
            failure_threshold: self.failure_threshold,
            reset_timeout_secs: self.reset_timeout.as_secs(),
        }
    }

    /// Force a circuit closed (operator action).
    pub fn reset(&self, upstream: &str) {
        if let Some(circuit) = self.circuits.get(upstream) {
            let mut state = lock(&circuit);
            let generation = state.generation.wrapping_add(1);
            *state = CircuitState::new();
            state.generation = generation;
            drop(state);
            tracing::info!(upstream = %upstream, "Circuit manually reset");
            metrics::record_circuit_transition(upstream, "closed");
        }
    }
}

/// Admission to call an upstream; report the outcome through it.
///
/// Dropping an unresolved trial permit (the caller's future was cancelled)
/// counts as a failed trial so the circuit cannot stay stuck half-open.
///
/// A permit issued before the circuit last opened (or was reset) is stale:
/// its outcome changes nothing.
pub struct CallPermit {
    registry: BreakerRegistry,
    upstream: String,
    circuit: Circuit,
    trial: bool,
    generation: u64,
    resolved: bool,
}

impl CallPermit {
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        let mut state = lock(&self.circuit);
        if self.is_current(&state) {
            self.registry.on_success(&self.upstream, &mut state);
        }
    }

    pub fn fail(mut self) {
        self.resolved = true;
        let mut state = lock(&self.circuit);
        if self.is_current(&state) {
            self.registry.on_failure(&self.upstream, &mut state);
        }
    }

    fn is_current(&self, state: &CircuitState) -> bool {
        if state.generation == self.generation {
            return true;
        }
        tracing::debug!(upstream = %self.upstream, "Ignoring outcome of call admitted before circuit reopened");
        false
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.resolved || !self.trial {
            return;
        }
        let mut state = lock(&self.circuit);
        if state.status == CircuitStatus::HalfOpen && state.trial_in_flight && state.generation == self.generation {
            tracing::debug!(upstream = %self.upstream, "Trial call abandoned");
            self.registry.on_failure(&self.upstream, &mut state);
        }
    }
}
