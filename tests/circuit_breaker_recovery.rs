//! End-to-end circuit breaker lifecycle: trip, cool down, probe, recover,
//! and relapse.

use sentinel_core::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ErrorCategory, ManualClock, SentinelError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn scanner_error() -> SentinelError {
    SentinelError::new(ErrorCategory::ConnectionReset, "scanner worker died")
}

fn recovery_breaker() -> (CircuitBreaker, ManualClock) {
    let clock = ManualClock::new();
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::new("scanner")
            .failure_threshold(3)
            .timeout(Duration::from_secs(1))
            .success_threshold(2),
    )
    .with_clock(clock.clone());
    (breaker, clock)
}

#[tokio::test]
async fn trip_and_recover() {
    let (breaker, clock) = recovery_breaker();

    // Three consecutive failures trip the circuit.
    for _ in 0..3 {
        let result = breaker.execute(|| async { Err::<(), _>(scanner_error()) }).await;
        assert_eq!(result.expect_err("op fails").category(), ErrorCategory::ConnectionReset);
    }
    assert_eq!(breaker.state(), CircuitState::Open);

    // Immediate call: denied without running the operation.
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let denied = breaker
        .execute(|| async move {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok::<_, SentinelError>(())
        })
        .await;
    assert!(denied.expect_err("must be denied").is_circuit_open());
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    // After the cool-down the next call is a probe that actually runs.
    clock.advance(1_100);
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_clone = ran.clone();
    let probe = breaker
        .execute(|| async move {
            ran_clone.fetch_add(1, Ordering::SeqCst);
            Ok::<_, SentinelError>("pong")
        })
        .await;
    assert_eq!(probe.expect("probe runs"), "pong");
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // Second success reaches the success threshold and closes the circuit.
    let closed = breaker.execute(|| async { Ok::<_, SentinelError>("pong") }).await;
    assert!(closed.is_ok());
    assert_eq!(breaker.state(), CircuitState::Closed);

    let metrics = breaker.metrics();
    assert_eq!(metrics.total_failures, 3);
    assert_eq!(metrics.total_successes, 2);
    // Closed -> Open -> HalfOpen -> Closed.
    assert_eq!(metrics.state_changes, 3);
}

#[tokio::test]
async fn half_open_relapse_restarts_the_timer() {
    let (breaker, clock) = recovery_breaker();

    for _ in 0..3 {
        let _ = breaker.execute(|| async { Err::<(), _>(scanner_error()) }).await;
    }
    clock.advance(1_100);

    // First probe succeeds; circuit stays half-open (needs 2 successes).
    let probe = breaker.execute(|| async { Ok::<_, SentinelError>(()) }).await;
    assert!(probe.is_ok());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);

    // A failure during probing reopens immediately.
    let relapse = breaker.execute(|| async { Err::<(), _>(scanner_error()) }).await;
    assert!(relapse.is_err());
    assert_eq!(breaker.state(), CircuitState::Open);

    // The cool-down restarted at the relapse: still closed to traffic
    // until a full timeout has elapsed again.
    clock.advance(900);
    let denied = breaker.execute(|| async { Ok::<_, SentinelError>(()) }).await;
    assert!(denied.expect_err("must be denied").is_circuit_open());

    clock.advance(200);
    let probe = breaker.execute(|| async { Ok::<_, SentinelError>(()) }).await;
    assert!(probe.is_ok());
    assert_eq!(breaker.state(), CircuitState::HalfOpen);
}

#[tokio::test]
async fn is_request_allowed_peeks_without_transitioning() {
    let (breaker, clock) = recovery_breaker();

    for _ in 0..3 {
        let _ = breaker.execute(|| async { Err::<(), _>(scanner_error()) }).await;
    }
    assert!(!breaker.is_request_allowed());

    clock.advance(1_100);
    assert!(breaker.is_request_allowed());
    // The peek did not move the state machine.
    assert_eq!(breaker.state(), CircuitState::Open);
}
