//! Convenient re-exports for common Sentinel Core types.
pub use crate::{
    circuit_breaker::{
        presets, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
    },
    clock::{Clock, ManualClock, MonotonicClock},
    constant_time::{compare_bytes, compare_hashes, compare_strings},
    error::{ErrorCategory, SentinelError},
    framing::{FrameReader, FrameWriter, MAX_MESSAGE_SIZE, MIN_MESSAGE_SIZE},
    rate_limit::TokenBucketRateLimiter,
    retry::{predicates, BuildError, RetryMetrics, RetryPolicy, RetryPolicyBuilder},
    sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper},
    telemetry::{
        CircuitBreakerEvent, LogSink, MemorySink, NullSink, PolicyEvent, RateLimitEvent,
        RetryEvent, SharedSink, TelemetrySink,
    },
};
