//! Token-bucket rate limiter with lazy refill.
//!
//! The bucket starts full and refills at a fixed whole-token rate. Refusal
//! is not an error: `try_consume` returns a boolean and callers decide what
//! refusal means for them.

use crate::clock::{Clock, MonotonicClock};
use crate::telemetry::{NullSink, PolicyEvent, RateLimitEvent, SharedSink};
use std::sync::{Arc, Mutex};

#[derive(Debug)]
struct BucketState {
    tokens: u64,
    last_refill_millis: u64,
}

/// Thread-safe token bucket.
///
/// Cloning yields a handle to the same bucket; a single mutex guards the
/// token count and refill timestamp, and is held only for O(1) bookkeeping.
///
/// Refill credits `floor(elapsed_seconds) * refill_rate` tokens, capped at
/// capacity. The refill timestamp advances by exactly the seconds that were
/// converted into tokens, so sub-second remainders accumulate across calls
/// instead of being discarded.
#[derive(Debug, Clone)]
pub struct TokenBucketRateLimiter {
    capacity: u64,
    refill_rate: u64,
    clock: Arc<dyn Clock>,
    sink: SharedSink,
    state: Arc<Mutex<BucketState>>,
}

impl TokenBucketRateLimiter {
    /// Create a bucket holding `capacity` tokens (the burst size) that
    /// refills at `refill_rate_per_second`. Starts full.
    pub fn new(capacity: u64, refill_rate_per_second: u64) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::default());
        let now = clock.now_millis();
        Self {
            capacity,
            refill_rate: refill_rate_per_second,
            clock,
            sink: Arc::new(NullSink),
            state: Arc::new(Mutex::new(BucketState { tokens: capacity, last_refill_millis: now })),
        }
    }

    /// Replace the clock. Resets the bucket to full against the new clock;
    /// intended for construction time, before the limiter is shared.
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        let now = self.clock.now_millis();
        self.state =
            Arc::new(Mutex::new(BucketState { tokens: self.capacity, last_refill_millis: now }));
        self
    }

    /// Attach a telemetry sink. Intended for construction time.
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    /// Try to consume `tokens` permits. Returns true and subtracts them if
    /// enough are available after a lazy refill; otherwise leaves the
    /// bucket unchanged and returns false.
    pub fn try_consume(&self, tokens: u64) -> bool {
        let (allowed, available) = {
            let mut state = self.lock_state();
            self.refill(&mut state);
            if state.tokens >= tokens {
                state.tokens -= tokens;
                (true, state.tokens)
            } else {
                (false, state.tokens)
            }
        };

        if !allowed {
            tracing::debug!(requested = tokens, available, "rate limit exceeded");
            self.sink.record(PolicyEvent::RateLimit(RateLimitEvent::Refused {
                requested: tokens,
                available,
            }));
        }
        allowed
    }

    /// Side-effect-free check: would `try_consume(tokens)` succeed right
    /// now? Repeated calls observe the same answer until time passes or
    /// tokens are consumed.
    pub fn would_allow(&self, tokens: u64) -> bool {
        let state = self.lock_state();
        self.tokens_after_refill(&state) >= tokens
    }

    /// Current token count after a hypothetical refill, without mutating
    /// state. May be stale by the time the caller acts on it.
    pub fn available_tokens(&self) -> u64 {
        let state = self.lock_state();
        self.tokens_after_refill(&state)
    }

    /// Restore the bucket to full capacity and restart the refill clock.
    pub fn reset(&self) {
        let mut state = self.lock_state();
        state.tokens = self.capacity;
        state.last_refill_millis = self.clock.now_millis();
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> u64 {
        self.refill_rate
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refill(&self, state: &mut BucketState) {
        let now = self.clock.now_millis();
        let elapsed_millis = now.saturating_sub(state.last_refill_millis);
        let whole_seconds = elapsed_millis / 1_000;
        let added = whole_seconds.saturating_mul(self.refill_rate);
        if added > 0 {
            state.tokens = state.tokens.saturating_add(added).min(self.capacity);
            // Advance by the credited seconds only, keeping the sub-second
            // remainder for the next refill.
            state.last_refill_millis += whole_seconds * 1_000;
        }
    }

    fn tokens_after_refill(&self, state: &BucketState) -> u64 {
        let now = self.clock.now_millis();
        let elapsed_millis = now.saturating_sub(state.last_refill_millis);
        let added = (elapsed_millis / 1_000).saturating_mul(self.refill_rate);
        state.tokens.saturating_add(added).min(self.capacity)
    }
}
