//! Retry policy with exponential backoff and jitter.
//!
//! An execution is a loop of up to `max_attempts` invocations of the
//! guarded operation. Failed attempts sleep `initial_delay *
//! multiplier^attempt` (capped at `max_delay`, perturbed by multiplicative
//! jitter) before trying again. A retry predicate classifies which error
//! categories are worth another attempt; everything else is returned
//! verbatim, immediately.

use crate::error::{ErrorCategory, SentinelError};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{NullSink, PolicyEvent, RetryEvent, SharedSink};
use rand::Rng;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

/// Construction-time validation failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("max_attempts must be at least 1 (got {0})")]
    InvalidMaxAttempts(usize),
    #[error("backoff_multiplier must be >= 1.0 (got {0})")]
    InvalidBackoffMultiplier(f64),
    #[error("jitter_factor must be within [0.0, 1.0] (got {0})")]
    InvalidJitterFactor(f64),
    #[error("initial_delay {initial:?} exceeds max_delay {max:?}")]
    DelayRangeInverted { initial: Duration, max: Duration },
}

impl From<BuildError> for SentinelError {
    fn from(err: BuildError) -> Self {
        SentinelError::new(ErrorCategory::InvalidArgument, err.to_string())
    }
}

/// Counters and wall-clock stamps for one policy instance.
///
/// `retried_executions` counts executions that needed at least one retry,
/// whether or not they ultimately succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RetryMetrics {
    pub total_executions: u64,
    pub total_attempts: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub retried_executions: u64,
    pub last_execution: Option<SystemTime>,
    pub last_success: Option<SystemTime>,
    pub last_failure: Option<SystemTime>,
}

type RetryPredicate = Arc<dyn Fn(&SentinelError) -> bool + Send + Sync>;

/// Retry policy instance.
///
/// Cloning yields a handle sharing the same metrics. The policy itself is
/// safe to call from one task at a time; callers that share one instance
/// across tasks synchronize externally or clone per task.
#[derive(Clone)]
pub struct RetryPolicy {
    name: String,
    max_attempts: usize,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter_factor: f64,
    predicate: Option<RetryPredicate>,
    sleeper: Arc<dyn Sleeper>,
    sink: SharedSink,
    metrics: Arc<Mutex<RetryMetrics>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("name", &self.name)
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter_factor", &self.jitter_factor)
            .field("predicate", &self.predicate.as_ref().map(|_| "<predicate>"))
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Run `operation` until it succeeds, a non-retryable error occurs, or
    /// attempts run out. Returns the operation's result unchanged; on
    /// exhaustion the last error is returned.
    ///
    /// The backoff sleep is the only suspension point this method owns.
    /// Dropping the returned future during a sleep cancels the execution;
    /// no further attempts are made.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, SentinelError>
    where
        Fut: Future<Output = Result<T, SentinelError>>,
        Op: FnMut() -> Fut,
    {
        {
            let mut metrics = self.lock_metrics();
            metrics.total_executions += 1;
            metrics.last_execution = Some(SystemTime::now());
        }

        let mut needed_retry = false;
        let mut attempts_made = 0usize;
        let mut last_error = SentinelError::new(ErrorCategory::Other, "no attempts made");

        for attempt in 0..self.max_attempts {
            self.lock_metrics().total_attempts += 1;
            attempts_made = attempt + 1;

            match operation().await {
                Ok(value) => {
                    let mut metrics = self.lock_metrics();
                    metrics.successful_executions += 1;
                    metrics.last_success = Some(SystemTime::now());
                    if needed_retry {
                        metrics.retried_executions += 1;
                    }
                    return Ok(value);
                }
                Err(error) => last_error = error,
            }

            if attempt + 1 >= self.max_attempts || !self.should_retry(&last_error) {
                break;
            }

            needed_retry = true;
            let delay = self.calculate_next_delay(attempt);
            tracing::debug!(
                policy = %self.name,
                attempt = attempt + 1,
                ?delay,
                error = %last_error,
                "attempt failed, backing off"
            );
            self.sink.record(PolicyEvent::Retry(RetryEvent::Attempt {
                policy: self.name.clone(),
                attempt: attempt + 1,
                delay,
            }));
            self.sleeper.sleep(delay).await;
        }

        {
            let mut metrics = self.lock_metrics();
            metrics.failed_executions += 1;
            metrics.last_failure = Some(SystemTime::now());
            if needed_retry {
                metrics.retried_executions += 1;
            }
        }
        tracing::warn!(
            policy = %self.name,
            attempts = attempts_made,
            error = %last_error,
            "giving up"
        );
        self.sink.record(PolicyEvent::Retry(RetryEvent::Exhausted {
            policy: self.name.clone(),
            attempts: attempts_made,
        }));
        Err(last_error)
    }

    /// Whether `error` would be retried. Without a predicate every error is
    /// retryable.
    pub fn should_retry(&self, error: &SentinelError) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(error),
            None => true,
        }
    }

    /// Delay before the retry following 0-indexed `attempt`, with backoff
    /// and jitter applied and the result clamped to `[0, max_delay]`.
    pub fn calculate_next_delay(&self, attempt: usize) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;

        let base = (initial_ms * self.backoff_multiplier.powi(attempt as i32)).min(max_ms);
        let jittered = (base * self.jitter_multiplier()).clamp(0.0, max_ms);
        Duration::from_millis(jittered as u64)
    }

    fn jitter_multiplier(&self) -> f64 {
        if self.jitter_factor == 0.0 {
            return 1.0;
        }
        // Uniform in [0, 1), scaled to [-jitter_factor, +jitter_factor).
        let random: f64 = rand::rng().random();
        1.0 + (random * 2.0 - 1.0) * self.jitter_factor
    }

    /// Snapshot of the current counters.
    pub fn metrics(&self) -> RetryMetrics {
        self.lock_metrics().clone()
    }

    pub fn reset_metrics(&self) {
        *self.lock_metrics() = RetryMetrics::default();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    pub fn jitter_factor(&self) -> f64 {
        self.jitter_factor
    }

    fn lock_metrics(&self) -> MutexGuard<'_, RetryMetrics> {
        self.metrics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct RetryPolicyBuilder {
    name: String,
    max_attempts: usize,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter_factor: f64,
    predicate: Option<RetryPredicate>,
    sleeper: Arc<dyn Sleeper>,
    sink: SharedSink,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            name: "unnamed".to_string(),
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            predicate: None,
            sleeper: Arc::new(TokioSleeper),
            sink: Arc::new(NullSink),
        }
    }

    /// Name used in logs and telemetry events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Total attempts including the initial one. Must be at least 1.
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Random perturbation of each delay as a fraction of the delay:
    /// 0.1 means +/-10%. Zero disables jitter.
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.jitter_factor = factor;
        self
    }

    /// Classifier deciding which errors are worth another attempt. Without
    /// one, every error is retried. See [`predicates`] for the standard
    /// classifiers.
    pub fn retry_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&SentinelError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> Result<RetryPolicy, BuildError> {
        if self.max_attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(self.max_attempts));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(BuildError::InvalidBackoffMultiplier(self.backoff_multiplier));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(BuildError::InvalidJitterFactor(self.jitter_factor));
        }
        if self.initial_delay > self.max_delay {
            return Err(BuildError::DelayRangeInverted {
                initial: self.initial_delay,
                max: self.max_delay,
            });
        }

        Ok(RetryPolicy {
            name: self.name,
            max_attempts: self.max_attempts,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff_multiplier: self.backoff_multiplier,
            jitter_factor: self.jitter_factor,
            predicate: self.predicate,
            sleeper: self.sleeper,
            sink: self.sink,
            metrics: Arc::new(Mutex::new(RetryMetrics::default())),
        })
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard retry classifiers operating on error categories only.
///
/// `permission_denied`, `not_found`, `invalid_argument`, `no_space`,
/// `protocol`, and `dns_permanent` are never retryable here; they signal
/// conditions that waiting will not fix.
pub mod predicates {
    use crate::error::{ErrorCategory, SentinelError};

    /// Database clients: connection churn, timeouts, lock contention.
    pub fn database(error: &SentinelError) -> bool {
        matches!(
            error.category(),
            ErrorCategory::ConnectionRefused
                | ErrorCategory::ConnectionReset
                | ErrorCategory::ConnectionAborted
                | ErrorCategory::NetworkUnreachable
                | ErrorCategory::HostUnreachable
                | ErrorCategory::Timeout
                | ErrorCategory::WouldBlock
                | ErrorCategory::Interrupted
                | ErrorCategory::Busy
        )
    }

    /// Local file operations: transient contention only.
    pub fn file_io(error: &SentinelError) -> bool {
        matches!(
            error.category(),
            ErrorCategory::WouldBlock
                | ErrorCategory::Busy
                | ErrorCategory::Interrupted
                | ErrorCategory::TextBusy
        )
    }

    /// IPC peers: connection churn, timeouts, broken pipes.
    pub fn ipc(error: &SentinelError) -> bool {
        matches!(
            error.category(),
            ErrorCategory::ConnectionRefused
                | ErrorCategory::ConnectionReset
                | ErrorCategory::ConnectionAborted
                | ErrorCategory::NetworkUnreachable
                | ErrorCategory::Timeout
                | ErrorCategory::WouldBlock
                | ErrorCategory::Interrupted
                | ErrorCategory::BrokenPipe
        )
    }

    /// Remote services: connection churn plus temporary DNS failures.
    pub fn network(error: &SentinelError) -> bool {
        matches!(
            error.category(),
            ErrorCategory::ConnectionRefused
                | ErrorCategory::ConnectionReset
                | ErrorCategory::ConnectionAborted
                | ErrorCategory::NetworkUnreachable
                | ErrorCategory::HostUnreachable
                | ErrorCategory::Timeout
                | ErrorCategory::WouldBlock
                | ErrorCategory::Interrupted
                | ErrorCategory::DnsTemporary
        )
    }
}
