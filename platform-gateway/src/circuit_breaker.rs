//! Per-server circuit breaker (spec §4.6), one instance per upstream server.
//!
//! CLOSED → OPEN when `failure_count >= failure_threshold` OR the observed failure rate
//! over the recorded call window exceeds 0.5. OPEN stays OPEN until `recovery_timeout`
//! elapses, then a single probe is let through as HALF_OPEN; success closes the circuit
//! (counts reset), failure reopens it and refreshes `last_failure_time`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Circuit breaker state (spec §3 `ServiceInstance.circuit_breaker_state`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Requests pass through normally.
    Closed,
    /// Requests fail immediately without reaching the upstream.
    Open,
    /// A single probe request is allowed to test recovery.
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive (or windowed) failures before opening the circuit.
    pub failure_threshold: usize,
    /// Failure rate over the call window above which the circuit opens even if the
    /// absolute failure count hasn't reached `failure_threshold`.
    pub failure_rate_threshold: f64,
    /// How many calls to retain for the failure-rate calculation.
    pub rate_window: usize,
    /// How long to stay OPEN before allowing a HALF_OPEN probe.
    pub recovery_timeout: Duration,
    /// Successes in HALF_OPEN before transitioning to CLOSED.
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_rate_threshold: 0.5,
            rate_window: 20,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Start building a config from spec defaults (`failure_threshold=5`,
    /// `recovery_timeout=30s`).
    #[must_use]
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder { config: Self::default() }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Set the absolute failure threshold.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: usize) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Set the failure-rate threshold (0.0-1.0).
    #[must_use]
    pub const fn failure_rate_threshold(mut self, rate: f64) -> Self {
        self.config.failure_rate_threshold = rate;
        self
    }

    /// Set how many recent calls feed the failure-rate calculation.
    #[must_use]
    pub const fn rate_window(mut self, window: usize) -> Self {
        self.config.rate_window = window;
        self
    }

    /// Set the OPEN→HALF_OPEN recovery timeout.
    #[must_use]
    pub const fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    /// Set the HALF_OPEN success threshold.
    #[must_use]
    pub const fn success_threshold(mut self, threshold: usize) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        self.config
    }
}

#[derive(Debug)]
struct Inner {
    state: State,
    failure_count: usize,
    success_count: usize,
    last_failure_time: Option<Instant>,
    recent_outcomes: std::collections::VecDeque<bool>,
}

impl Inner {
    fn record_outcome(&mut self, window: usize, success: bool) {
        self.recent_outcomes.push_back(success);
        while self.recent_outcomes.len() > window {
            self.recent_outcomes.pop_front();
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.recent_outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.recent_outcomes.iter().filter(|&&ok| !ok).count();
        failures as f64 / self.recent_outcomes.len() as f64
    }
}

/// Per-server circuit breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<RwLock<Inner>>,
    total_calls: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// A circuit breaker starting CLOSED.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(RwLock::new(Inner {
                state: State::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
                recent_outcomes: std::collections::VecDeque::new(),
            })),
            total_calls: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The current state.
    pub async fn state(&self) -> State {
        self.inner.read().await.state
    }

    /// Whether an OPEN breaker has been open long enough that the next [`Self::call`]
    /// would admit a HALF_OPEN probe, i.e. `last_failure_time.elapsed() >=
    /// recovery_timeout`. Always `true` for `Closed`/`HalfOpen` (nothing to wait out).
    ///
    /// Read-only: unlike `can_attempt` (invoked from inside `call`), this never mutates
    /// state. It exists so callers deciding whether to *route to* this breaker at all
    /// (e.g. `ServiceInstance::is_selectable`) can tell a breaker that is merely open
    /// from one that is open and past its recovery timeout — otherwise an instance could
    /// never be selected again once its breaker opens, since only `call` can transition
    /// OPEN to HALF_OPEN and `call` is never reached unless the instance is selectable.
    pub async fn would_probe_now(&self) -> bool {
        let inner = self.inner.read().await;
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => inner
                .last_failure_time
                .is_some_and(|last| last.elapsed() >= self.config.recovery_timeout),
        }
    }

    /// Run `operation` through the breaker: rejected immediately with `Err(None)` if not
    /// selectable right now, otherwise run and record the outcome.
    ///
    /// # Errors
    ///
    /// Returns `Ok(None)` if the circuit is open and not yet eligible for a probe.
    /// Returns `Ok(Some(Err(e)))` if the operation ran and failed.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Option<Result<T, E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if !self.can_attempt().await {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("gateway.circuit_breaker.rejected").increment(1);
            return None;
        }

        match operation().await {
            Ok(value) => {
                self.on_success().await;
                self.total_successes.fetch_add(1, Ordering::Relaxed);
                Some(Ok(value))
            }
            Err(err) => {
                self.on_failure().await;
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                Some(Err(err))
            }
        }
    }

    async fn can_attempt(&self) -> bool {
        let mut inner = self.inner.write().await;
        match inner.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let eligible = inner
                    .last_failure_time
                    .is_some_and(|last| last.elapsed() >= self.config.recovery_timeout);
                if eligible {
                    tracing::info!("circuit breaker transitioning OPEN -> HALF_OPEN");
                    inner.state = State::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    async fn on_success(&self) {
        let mut inner = self.inner.write().await;
        inner.record_outcome(self.config.rate_window, true);

        match inner.state {
            State::Closed => {
                inner.failure_count = 0;
            }
            State::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.config.success_threshold {
                    tracing::info!("circuit breaker transitioning HALF_OPEN -> CLOSED");
                    inner.state = State::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.last_failure_time = None;
                    metrics::counter!("gateway.circuit_breaker.closed").increment(1);
                }
            }
            State::Open => {}
        }
    }

    async fn on_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.record_outcome(self.config.rate_window, false);
        inner.last_failure_time = Some(Instant::now());

        match inner.state {
            State::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.failure_threshold
                    || inner.failure_rate() > self.config.failure_rate_threshold
                {
                    tracing::warn!(
                        failures = inner.failure_count,
                        failure_rate = inner.failure_rate(),
                        "circuit breaker transitioning CLOSED -> OPEN"
                    );
                    inner.state = State::Open;
                    metrics::counter!("gateway.circuit_breaker.opened").increment(1);
                }
            }
            State::HalfOpen => {
                tracing::warn!("circuit breaker transitioning HALF_OPEN -> OPEN (probe failed)");
                inner.state = State::Open;
                inner.failure_count = self.config.failure_threshold.max(1);
                inner.success_count = 0;
            }
            State::Open => {
                inner.failure_count += 1;
            }
        }
    }

    /// Aggregate call counters.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }

    /// Force the breaker back to CLOSED, clearing failure state.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.state = State::Closed;
        inner.failure_count = 0;
        inner.success_count = 0;
        inner.last_failure_time = None;
        inner.recent_outcomes.clear();
    }
}

/// Snapshot of a breaker's call counters.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    /// Total calls attempted (including rejections).
    pub total_calls: u64,
    /// Calls that ran and succeeded.
    pub total_successes: u64,
    /// Calls that ran and failed.
    pub total_failures: u64,
    /// Calls rejected without running because the circuit was open.
    pub total_rejections: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_on_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
        let result = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(matches!(result, Some(Ok(1))));
        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn s6_opens_after_five_failures_and_recovers_after_timeout() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(5)
            .recovery_timeout(Duration::from_millis(20))
            .build();
        let breaker = CircuitBreaker::new(config);

        for _ in 0..5 {
            let _ = breaker.call(|| async { Err::<i32, _>("boom") }).await;
        }
        assert_eq!(breaker.state().await, State::Open);

        let rejected = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(rejected.is_none());

        tokio::time::sleep(Duration::from_millis(30)).await;

        let probe = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        assert!(matches!(probe, Some(Ok(1))));
        assert_eq!(breaker.state().await, State::Closed);
        assert_eq!(breaker.metrics().total_failures, 5);
    }

    #[tokio::test]
    async fn opens_on_failure_rate_even_below_absolute_threshold() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(100)
            .failure_rate_threshold(0.5)
            .rate_window(4)
            .build();
        let breaker = CircuitBreaker::new(config);

        let _ = breaker.call(|| async { Ok::<_, &str>(1) }).await;
        let _ = breaker.call(|| async { Err::<i32, _>("e") }).await;
        let _ = breaker.call(|| async { Err::<i32, _>("e") }).await;
        let _ = breaker.call(|| async { Err::<i32, _>("e") }).await;

        assert_eq!(breaker.state().await, State::Open);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens_the_circuit() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .recovery_timeout(Duration::from_millis(10))
            .build();
        let breaker = CircuitBreaker::new(config);

        let _ = breaker.call(|| async { Err::<i32, _>("e") }).await;
        assert_eq!(breaker.state().await, State::Open);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = breaker.call(|| async { Err::<i32, _>("still failing") }).await;
        assert_eq!(breaker.state().await, State::Open);
    }
}
