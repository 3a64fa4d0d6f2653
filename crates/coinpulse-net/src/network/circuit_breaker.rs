//! Circuit breaker for chronically failing targets.
//!
//! State machine:
//! - CLOSED: calls flow through; consecutive failures are counted.
//! - OPEN: calls are rejected immediately until the reset timeout elapses.
//! - HALF_OPEN: exactly one trial call is admitted; it decides recovery.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BreakerTuning;
use crate::error::{timeout_after, Failure, RecoveryError};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// Failing; calls are rejected immediately.
    Open,
    /// Testing recovery with a single trial call.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit.
    pub failure_threshold: u32,
    /// Timeout applied to each guarded call; a timeout counts as a failure.
    pub call_timeout: Duration,
    /// Time the circuit stays open before allowing a trial call.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: BreakerTuning::FAILURE_THRESHOLD,
            call_timeout: BreakerTuning::CALL_TIMEOUT,
            reset_timeout: BreakerTuning::RESET_TIMEOUT,
        }
    }
}

/// Per-operation-key circuit breaker.
pub struct CircuitBreaker {
    key: String,
    config: CircuitBreakerConfig,
    state: RwLock<CircuitState>,
    /// Consecutive failure count, reset on success.
    failure_count: AtomicU32,
    /// Lifetime counters for observability.
    total_failures: AtomicU64,
    total_successes: AtomicU64,
    /// When the most recent failure was recorded; gates OPEN -> HALF_OPEN.
    last_failure_at: RwLock<Option<Instant>>,
    /// Trial calls admitted while half-open.
    half_open_probes: AtomicU32,
}

impl CircuitBreaker {
    pub fn new(key: impl Into<String>) -> Self {
        Self::with_config(key, CircuitBreakerConfig::default())
    }

    pub fn with_config(key: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            key: key.into(),
            config,
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicU32::new(0),
            total_failures: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            last_failure_at: RwLock::new(None),
            half_open_probes: AtomicU32::new(0),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current state, folding in any pending OPEN -> HALF_OPEN transition.
    pub fn state(&self) -> CircuitState {
        self.maybe_transition_to_half_open();
        *self.state.read().unwrap()
    }

    /// Run a guarded call through the breaker.
    ///
    /// Rejected with [`RecoveryError::CircuitOpen`] while the circuit is
    /// open, or when a concurrent caller already holds the half-open trial
    /// slot. The call itself is bounded by `call_timeout`.
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T, RecoveryError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<Failure>,
    {
        let Some(trial) = self.try_acquire() else {
            return Err(RecoveryError::CircuitOpen {
                key: self.key.clone(),
                failure_count: self.failure_count.load(Ordering::SeqCst),
            });
        };

        // A caller may drop this future mid-call (select!, outer timeout);
        // the guard keeps an unreported trial from stranding the half-open
        // slot.
        let mut trial_guard = trial.then(|| AbandonedTrialGuard {
            breaker: self,
            armed: true,
        });

        let outcome = match tokio::time::timeout(self.config.call_timeout, operation()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(timeout_after("Guarded call", self.config.call_timeout)),
        };
        if let Some(guard) = trial_guard.as_mut() {
            guard.armed = false;
        }

        match outcome {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(failure) => {
                self.record_failure();
                Err(RecoveryError::Failure(failure))
            }
        }
    }

    /// Reset to CLOSED, clearing all failure history.
    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        self.half_open_probes.store(0, Ordering::SeqCst);
        *self.last_failure_at.write().unwrap() = None;
        *self.state.write().unwrap() = CircuitState::Closed;
        info!("Circuit breaker for '{}' reset to CLOSED", self.key);
    }

    /// Observability snapshot.
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let state = self.state();
        CircuitBreakerSnapshot {
            key: self.key.clone(),
            state,
            failure_count: self.failure_count.load(Ordering::SeqCst),
            total_failures: self.total_failures.load(Ordering::SeqCst),
            total_successes: self.total_successes.load(Ordering::SeqCst),
            since_last_failure: self
                .last_failure_at
                .read()
                .unwrap()
                .map(|at| at.elapsed()),
        }
    }

    // Internal state transitions

    /// Admission decision: `Some(true)` admits the half-open trial call,
    /// `Some(false)` a normal closed-state call, `None` rejects.
    fn try_acquire(&self) -> Option<bool> {
        self.maybe_transition_to_half_open();
        match *self.state.read().unwrap() {
            CircuitState::Closed => Some(false),
            CircuitState::Open => None,
            // Exactly one trial call while half-open.
            CircuitState::HalfOpen => {
                (self.half_open_probes.fetch_add(1, Ordering::SeqCst) == 0).then_some(true)
            }
        }
    }

    /// A half-open trial call was dropped before reporting an outcome.
    /// Treated like a failed trial: back to OPEN with a fresh timeout, so a
    /// later call gets the slot.
    fn trial_abandoned(&self) {
        let mut state = self.state.write().unwrap();
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            *self.last_failure_at.write().unwrap() = Some(Instant::now());
            self.half_open_probes.store(0, Ordering::SeqCst);
            warn!(
                "Circuit breaker for '{}' trial call abandoned mid-flight; reopening",
                self.key
            );
        }
    }

    fn record_success(&self) {
        self.total_successes.fetch_add(1, Ordering::SeqCst);
        self.failure_count.store(0, Ordering::SeqCst);

        if *self.state.read().unwrap() == CircuitState::HalfOpen {
            self.transition_to_closed();
        }
    }

    fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::SeqCst);
        let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        *self.last_failure_at.write().unwrap() = Some(Instant::now());

        let state = *self.state.read().unwrap();
        match state {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold {
                    self.transition_to_open(failures);
                }
            }
            CircuitState::HalfOpen => {
                // Trial call failed; back to open with a fresh timeout.
                self.transition_to_open(failures);
            }
            CircuitState::Open => {}
        }
    }

    fn transition_to_open(&self, failures: u32) {
        let mut state = self.state.write().unwrap();
        if *state != CircuitState::Open {
            *state = CircuitState::Open;
            self.half_open_probes.store(0, Ordering::SeqCst);
            warn!(
                "Circuit breaker for '{}' opened after {} failures",
                self.key, failures
            );
        }
    }

    fn transition_to_closed(&self) {
        *self.state.write().unwrap() = CircuitState::Closed;
        self.failure_count.store(0, Ordering::SeqCst);
        *self.last_failure_at.write().unwrap() = None;
        info!("Circuit breaker for '{}' recovered to CLOSED", self.key);
    }

    fn maybe_transition_to_half_open(&self) {
        if *self.state.read().unwrap() != CircuitState::Open {
            return;
        }
        let last_failure = *self.last_failure_at.read().unwrap();
        if let Some(at) = last_failure {
            if at.elapsed() >= self.config.reset_timeout {
                let mut state = self.state.write().unwrap();
                if *state == CircuitState::Open {
                    *state = CircuitState::HalfOpen;
                    self.half_open_probes.store(0, Ordering::SeqCst);
                    debug!("Circuit breaker for '{}' entering HALF_OPEN", self.key);
                }
            }
        }
    }
}

/// Reopens the breaker if a half-open trial call is dropped without ever
/// reporting an outcome. Disarmed once `execute` records success or failure.
struct AbandonedTrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for AbandonedTrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.trial_abandoned();
        }
    }
}

/// Point-in-time view of a breaker, for status surfaces and telemetry.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CircuitBreakerSnapshot {
    pub key: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub since_last_failure: Option<Duration>,
}
