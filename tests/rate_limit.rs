//! Burst-then-refill behavior of the token bucket under a hand-driven
//! clock.

use sentinel_core::{ManualClock, TokenBucketRateLimiter};

#[test]
fn burst_of_capacity_then_refill_at_rate() {
    let clock = ManualClock::new();
    let limiter = TokenBucketRateLimiter::new(5, 1).with_clock(clock.clone());

    // Five immediate consumes succeed; the sixth is refused.
    for i in 0..5 {
        assert!(limiter.try_consume(1), "consume {i} within burst");
    }
    assert!(!limiter.try_consume(1));

    // Two seconds at 1 token/s buys exactly two more.
    clock.advance(2_000);
    assert!(limiter.try_consume(1));
    assert!(limiter.try_consume(1));
    assert!(!limiter.try_consume(1));
}

#[test]
fn tokens_never_exceed_capacity() {
    let clock = ManualClock::new();
    let limiter = TokenBucketRateLimiter::new(3, 10).with_clock(clock.clone());

    clock.advance(3_600_000);
    assert_eq!(limiter.available_tokens(), 3);

    assert!(limiter.try_consume(3));
    assert!(!limiter.try_consume(1));
}

#[test]
fn peeks_do_not_disturb_the_bucket() {
    let clock = ManualClock::new();
    let limiter = TokenBucketRateLimiter::new(4, 2).with_clock(clock.clone());

    assert!(limiter.try_consume(4));
    clock.advance(1_000);

    for _ in 0..50 {
        assert!(limiter.would_allow(2));
        assert_eq!(limiter.available_tokens(), 2);
    }
    // The peeked tokens are still there to consume.
    assert!(limiter.try_consume(2));
    assert!(!limiter.try_consume(1));
}

#[test]
fn shared_handles_drain_one_bucket() {
    let clock = ManualClock::new();
    let limiter = TokenBucketRateLimiter::new(10, 1).with_clock(clock.clone());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let limiter = limiter.clone();
            std::thread::spawn(move || {
                let mut granted = 0u32;
                for _ in 0..10 {
                    if limiter.try_consume(1) {
                        granted += 1;
                    }
                }
                granted
            })
        })
        .collect();

    let granted: u32 = handles.into_iter().map(|h| h.join().expect("consumer panicked")).sum();
    assert_eq!(granted, 10, "exactly the burst capacity may be granted");
    assert_eq!(limiter.available_tokens(), 0);
}
