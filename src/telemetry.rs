//! Telemetry events emitted by the primitives.
//!
//! There is no process-wide collector: each primitive takes an
//! `Arc<dyn TelemetrySink>` at construction and emits structured events
//! through it. The default [`NullSink`] drops everything; [`LogSink`]
//! forwards to `tracing`; [`MemorySink`] buffers events for inspection in
//! tests and aggregators.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Consumer of [`PolicyEvent`]s.
///
/// Sinks are invoked on policy hot paths while no locks are held, so
/// implementations should be cheap and must never block for long.
pub trait TelemetrySink: Send + Sync + fmt::Debug {
    fn record(&self, event: PolicyEvent);
}

/// Shared handle to a sink, as stored in primitive configurations.
pub type SharedSink = Arc<dyn TelemetrySink>;

/// Events emitted during policy execution.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    CircuitBreaker(CircuitBreakerEvent),
    Retry(RetryEvent),
    RateLimit(RateLimitEvent),
}

/// Circuit breaker state-transition events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// The circuit tripped open; subsequent requests fail fast.
    Opened {
        name: String,
        consecutive_failures: usize,
    },
    /// The cool-down expired; a probe request will be admitted.
    HalfOpen { name: String },
    /// Recovery confirmed; normal operation resumed.
    Closed { name: String },
}

/// Retry policy events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A failed attempt will be retried after `delay`.
    Attempt {
        policy: String,
        /// 1-indexed number of the attempt that just failed.
        attempt: usize,
        delay: Duration,
    },
    /// The execution gave up; the last error is being returned.
    Exhausted { policy: String, attempts: usize },
}

/// Rate limiter events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitEvent {
    /// A consume request was refused for lack of tokens.
    Refused { requested: u64, available: u64 },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CircuitBreaker(e) => write!(f, "CircuitBreaker::{e}"),
            Self::Retry(e) => write!(f, "Retry::{e}"),
            Self::RateLimit(e) => write!(f, "RateLimit::{e}"),
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened { name, consecutive_failures } => {
                write!(f, "Opened({name}, failures={consecutive_failures})")
            }
            Self::HalfOpen { name } => write!(f, "HalfOpen({name})"),
            Self::Closed { name } => write!(f, "Closed({name})"),
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Attempt { policy, attempt, delay } => {
                write!(f, "Attempt({policy}, #{attempt}, delay={delay:?})")
            }
            Self::Exhausted { policy, attempts } => {
                write!(f, "Exhausted({policy}, attempts={attempts})")
            }
        }
    }
}

impl fmt::Display for RateLimitEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refused { requested, available } => {
                write!(f, "Refused(requested={requested}, available={available})")
            }
        }
    }
}

/// Sink that discards every event. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn record(&self, _event: PolicyEvent) {}
}

/// Sink that forwards events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, event: PolicyEvent) {
        tracing::debug!(%event, "policy event");
    }
}

/// Sink that buffers events in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<PolicyEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, in emission order.
    pub fn events(&self) -> Vec<PolicyEvent> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, event: PolicyEvent) {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(event);
    }
}
