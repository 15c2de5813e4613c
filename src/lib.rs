#![forbid(unsafe_code)]

//! # Sentinel Core
//!
//! Resilience and security primitives for a hardened client: the kernel
//! used by a browser's download/request pipeline to survive failing
//! dependencies and hostile peers.
//!
//! ## Primitives
//!
//! - **Circuit breaker** with half-open recovery probing and named presets
//! - **Token-bucket rate limiter** with burst capacity and lazy refill
//! - **Retry policy** with exponential backoff, jitter, and error-category
//!   predicates
//! - **Length-prefixed IPC framing** with size, timeout, and partial-read
//!   safety
//! - **Constant-time comparison** for tokens and hashes
//!
//! The primitives are independent; they share only the monotonic [`Clock`]
//! abstraction, the [`SentinelError`] value, and the injected
//! [`telemetry::TelemetrySink`]. There is no global state: construct what
//! you need, share handles by cloning.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use sentinel_core::retry::predicates;
//! use sentinel_core::{
//!     circuit_breaker::presets, CircuitBreaker, RetryPolicy, SentinelError,
//!     TokenBucketRateLimiter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), SentinelError> {
//!     // Cap the request rate before anything else runs.
//!     let limiter = TokenBucketRateLimiter::new(100, 10);
//!
//!     // Guard the scanner dependency with a preset breaker.
//!     let breaker = CircuitBreaker::new(presets::yara_scanner());
//!
//!     // Retry transient network failures with exponential backoff.
//!     let retry = RetryPolicy::builder()
//!         .name("scan_request")
//!         .max_attempts(3)
//!         .initial_delay(Duration::from_millis(100))
//!         .retry_predicate(predicates::network)
//!         .build()?;
//!
//!     if limiter.try_consume(1) {
//!         let verdict = breaker
//!             .execute(|| retry.execute(|| async { Ok::<_, SentinelError>("clean") }))
//!             .await?;
//!         assert_eq!(verdict, "clean");
//!     }
//!     Ok(())
//! }
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod constant_time;
pub mod error;
pub mod framing;
pub mod rate_limit;
pub mod retry;
pub mod sleeper;
pub mod telemetry;

pub mod prelude;

// Re-exports
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use constant_time::{compare_bytes, compare_hashes, compare_strings};
pub use error::{ErrorCategory, SentinelError};
pub use framing::{
    FrameReader, FrameWriter, DEFAULT_READ_TIMEOUT, HEADER_SIZE, MAX_MESSAGE_SIZE,
    MIN_MESSAGE_SIZE,
};
pub use rate_limit::TokenBucketRateLimiter;
pub use retry::{BuildError, RetryMetrics, RetryPolicy, RetryPolicyBuilder};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use telemetry::{LogSink, MemorySink, NullSink, PolicyEvent, SharedSink, TelemetrySink};
