//! Circuit breaker: a three-state gate in front of a failing dependency.
//!
//! - `Closed`: requests pass through; consecutive failures are counted.
//! - `Open`: requests are rejected immediately with a `circuit_open` error.
//! - `HalfOpen`: after the cool-down, a single probe request is admitted to
//!   test recovery.
//!
//! Transitions: `Closed -> Open` at `failure_threshold` consecutive
//! failures; `Open -> HalfOpen` once `timeout` has elapsed;
//! `HalfOpen -> Closed` after `success_threshold` consecutive successes;
//! any failure in `HalfOpen` reopens the circuit with a fresh timer.
//!
//! All state lives behind one mutex, held only for O(1) bookkeeping and
//! never across the guarded operation. The state observed by
//! [`CircuitBreaker::execute`] when it admits a request may therefore be
//! stale by the time the operation runs; that window is inherent and
//! accepted.

use crate::clock::{Clock, MonotonicClock};
use crate::error::{ErrorCategory, SentinelError};
use crate::telemetry::{CircuitBreakerEvent, NullSink, PolicyEvent, SharedSink};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

/// The three positions of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        })
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the circuit open.
    pub failure_threshold: usize,
    /// How long the circuit stays open before probing recovery.
    pub timeout: Duration,
    /// Consecutive successes needed to close from half-open.
    pub success_threshold: usize,
    /// Name used in logs, errors, and telemetry events.
    pub name: String,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
            name: "unnamed".to_string(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = threshold;
        self
    }
}

/// Pre-tuned configurations for the dependencies the download pipeline
/// talks to. Values are defaults; callers may adjust the returned config
/// before constructing the breaker.
pub mod presets {
    use super::CircuitBreakerConfig;
    use std::time::Duration;

    /// Policy database: 5 failures, 30 s cool-down, 2 successes to close.
    pub fn database() -> CircuitBreakerConfig {
        CircuitBreakerConfig::new("database")
            .failure_threshold(5)
            .timeout(Duration::from_secs(30))
            .success_threshold(2)
    }

    /// Scanner workers: 3 failures, 60 s cool-down, 3 successes to close.
    pub fn yara_scanner() -> CircuitBreakerConfig {
        CircuitBreakerConfig::new("yara_scanner")
            .failure_threshold(3)
            .timeout(Duration::from_secs(60))
            .success_threshold(3)
    }

    /// IPC peers: 10 failures, 10 s cool-down, 1 success to close.
    pub fn ipc_client() -> CircuitBreakerConfig {
        CircuitBreakerConfig::new("ipc_client")
            .failure_threshold(10)
            .timeout(Duration::from_secs(10))
            .success_threshold(1)
    }

    /// Third-party APIs: 3 failures, 60 s cool-down, 2 successes to close.
    pub fn external_api() -> CircuitBreakerConfig {
        CircuitBreakerConfig::new("external_api")
            .failure_threshold(3)
            .timeout(Duration::from_secs(60))
            .success_threshold(2)
    }
}

/// Point-in-time snapshot of a breaker's counters.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub total_failures: u64,
    pub total_successes: u64,
    pub consecutive_failures: usize,
    pub consecutive_successes: usize,
    pub state_changes: u64,
    pub last_failure_time: Option<SystemTime>,
    pub last_success_time: Option<SystemTime>,
    pub last_state_change: Option<SystemTime>,
    /// How long the current `Open` period has lasted; zero unless open.
    pub current_open_duration: Duration,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_successes: usize,
    total_failures: u64,
    total_successes: u64,
    state_changes: u64,
    last_failure_time: Option<SystemTime>,
    last_success_time: Option<SystemTime>,
    last_state_change: Option<SystemTime>,
    /// Monotonic stamp of the most recent transition; drives the
    /// open -> half-open timer.
    state_changed_at_millis: u64,
    open_entered_at_millis: Option<u64>,
    /// True while a half-open probe admitted by `execute` is in flight.
    probe_in_flight: bool,
}

/// Shared, thread-safe circuit breaker.
///
/// Cloning yields a handle to the same breaker. `execute` wraps an
/// operation with the gate; `record_success` / `record_failure` are public
/// for callers that drive the outcome themselves.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    clock: Arc<dyn Clock>,
    sink: SharedSink,
    state: Arc<Mutex<BreakerState>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());
        let now = clock.now_millis();
        tracing::debug!(
            breaker = %config.name,
            failure_threshold = config.failure_threshold,
            timeout_ms = config.timeout.as_millis() as u64,
            success_threshold = config.success_threshold,
            "circuit breaker created"
        );
        Self {
            config: Arc::new(config),
            clock,
            sink: Arc::new(NullSink),
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                total_failures: 0,
                total_successes: 0,
                state_changes: 0,
                last_failure_time: None,
                last_success_time: None,
                last_state_change: None,
                state_changed_at_millis: now,
                open_entered_at_millis: None,
                probe_in_flight: false,
            })),
        }
    }

    /// Default configuration under the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(CircuitBreakerConfig::new(name))
    }

    /// Replace the clock. Restamps the transition timer against the new
    /// clock; intended for construction time, before the breaker is shared.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        let now = self.clock.now_millis();
        let mut state = self.lock_state();
        state.state_changed_at_millis = now;
        state.open_entered_at_millis = None;
        drop(state);
        self
    }

    /// Attach a telemetry sink. Intended for construction time.
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Run `operation` behind the gate.
    ///
    /// If the gate denies the request, returns a `circuit_open` error
    /// without invoking the operation. Otherwise the operation runs with no
    /// lock held, its outcome is recorded, and its result is returned
    /// unchanged.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, SentinelError>
    where
        Fut: Future<Output = Result<T, SentinelError>>,
        Op: FnOnce() -> Fut,
    {
        self.check_and_update_state()?;

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }

    /// Acquire the gate: transitions `Open -> HalfOpen` when the cool-down
    /// has elapsed, claims the half-open probe slot, or denies with a
    /// `circuit_open` error.
    fn check_and_update_state(&self) -> Result<(), SentinelError> {
        let event = {
            let mut state = self.lock_state();
            match state.state {
                CircuitState::Closed => None,
                CircuitState::Open => {
                    if self.cooldown_elapsed(&state) {
                        let event = self.transition_locked(&mut state, CircuitState::HalfOpen);
                        state.probe_in_flight = true;
                        event
                    } else {
                        drop(state);
                        tracing::debug!(breaker = %self.config.name, "request denied, circuit open");
                        return Err(self.open_error());
                    }
                }
                CircuitState::HalfOpen => {
                    if state.probe_in_flight {
                        drop(state);
                        tracing::debug!(
                            breaker = %self.config.name,
                            "request denied, half-open probe already in flight"
                        );
                        return Err(self.open_error());
                    }
                    state.probe_in_flight = true;
                    None
                }
            }
        };
        self.emit(event);
        Ok(())
    }

    /// Record a successful call. Public for callers that run the operation
    /// themselves around [`is_request_allowed`](Self::is_request_allowed).
    pub fn record_success(&self) {
        let event = {
            let mut state = self.lock_state();
            state.total_successes += 1;
            state.consecutive_successes += 1;
            state.consecutive_failures = 0;
            state.last_success_time = Some(SystemTime::now());
            state.probe_in_flight = false;

            if state.state == CircuitState::HalfOpen
                && state.consecutive_successes >= self.config.success_threshold
            {
                self.transition_locked(&mut state, CircuitState::Closed)
            } else {
                None
            }
        };
        self.emit(event);
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let event = {
            let mut state = self.lock_state();
            state.total_failures += 1;
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;
            state.last_failure_time = Some(SystemTime::now());
            state.probe_in_flight = false;

            match state.state {
                CircuitState::Closed
                    if state.consecutive_failures >= self.config.failure_threshold =>
                {
                    self.transition_locked(&mut state, CircuitState::Open)
                }
                // Any failure while probing reopens the circuit.
                CircuitState::HalfOpen => self.transition_locked(&mut state, CircuitState::Open),
                _ => None,
            }
        };
        self.emit(event);
    }

    /// Force the circuit open, bypassing thresholds.
    pub fn trip(&self) {
        let event = {
            let mut state = self.lock_state();
            tracing::warn!(breaker = %self.config.name, "manually tripped");
            self.transition_locked(&mut state, CircuitState::Open)
        };
        self.emit(event);
    }

    /// Force the circuit closed, bypassing thresholds.
    pub fn reset(&self) {
        let event = {
            let mut state = self.lock_state();
            tracing::info!(breaker = %self.config.name, "manually reset");
            state.consecutive_failures = 0;
            state.consecutive_successes = 0;
            self.transition_locked(&mut state, CircuitState::Closed)
        };
        self.emit(event);
    }

    /// Zero the counters without touching the circuit position.
    pub fn reset_metrics(&self) {
        let mut state = self.lock_state();
        state.total_failures = 0;
        state.total_successes = 0;
        state.consecutive_failures = 0;
        state.consecutive_successes = 0;
        state.state_changes = 0;
        state.last_failure_time = None;
        state.last_success_time = None;
    }

    pub fn state(&self) -> CircuitState {
        self.lock_state().state
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let state = self.lock_state();
        let current_open_duration = match (state.state, state.open_entered_at_millis) {
            (CircuitState::Open, Some(entered)) => {
                Duration::from_millis(self.clock.now_millis().saturating_sub(entered))
            }
            _ => Duration::ZERO,
        };
        CircuitBreakerMetrics {
            state: state.state,
            total_failures: state.total_failures,
            total_successes: state.total_successes,
            consecutive_failures: state.consecutive_failures,
            consecutive_successes: state.consecutive_successes,
            state_changes: state.state_changes,
            last_failure_time: state.last_failure_time,
            last_success_time: state.last_success_time,
            last_state_change: state.last_state_change,
            current_open_duration,
        }
    }

    /// Would a request be admitted right now? A pure peek: performs no
    /// transition and does not claim the probe slot, so the answer may be
    /// stale by the time the caller acts on it.
    pub fn is_request_allowed(&self) -> bool {
        let state = self.lock_state();
        match state.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => !state.probe_in_flight,
            CircuitState::Open => self.cooldown_elapsed(&state),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Perform a transition, stamping timers and counters. Same-state
    /// transitions are no-ops. Returns the telemetry event to emit once the
    /// lock is released.
    fn transition_locked(
        &self,
        state: &mut BreakerState,
        new_state: CircuitState,
    ) -> Option<PolicyEvent> {
        if state.state == new_state {
            return None;
        }

        let old_state = state.state;
        state.state = new_state;
        state.state_changes += 1;
        state.state_changed_at_millis = self.clock.now_millis();
        state.last_state_change = Some(SystemTime::now());
        state.probe_in_flight = false;

        let event = match new_state {
            CircuitState::Closed => {
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
                tracing::info!(breaker = %self.config.name, from = %old_state, "circuit closed");
                CircuitBreakerEvent::Closed { name: self.config.name.clone() }
            }
            CircuitState::Open => {
                state.consecutive_successes = 0;
                state.open_entered_at_millis = Some(state.state_changed_at_millis);
                tracing::warn!(
                    breaker = %self.config.name,
                    from = %old_state,
                    consecutive_failures = state.consecutive_failures,
                    "circuit opened"
                );
                CircuitBreakerEvent::Opened {
                    name: self.config.name.clone(),
                    consecutive_failures: state.consecutive_failures,
                }
            }
            CircuitState::HalfOpen => {
                state.consecutive_failures = 0;
                state.consecutive_successes = 0;
                tracing::info!(breaker = %self.config.name, from = %old_state, "circuit half-open");
                CircuitBreakerEvent::HalfOpen { name: self.config.name.clone() }
            }
        };
        Some(PolicyEvent::CircuitBreaker(event))
    }

    fn cooldown_elapsed(&self, state: &BreakerState) -> bool {
        let elapsed = self.clock.now_millis().saturating_sub(state.state_changed_at_millis);
        elapsed >= self.config.timeout.as_millis() as u64
    }

    fn open_error(&self) -> SentinelError {
        SentinelError::new(
            ErrorCategory::CircuitOpen,
            format!("circuit breaker '{}' is open", self.config.name),
        )
    }

    fn emit(&self, event: Option<PolicyEvent>) {
        if let Some(event) = event {
            self.sink.record(event);
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
