//! Circuit breaker pattern implementation.
//!
//! The circuit breaker prevents cascading failures by stopping requests
//! to a failing provider and allowing it time to recover.
//!
//! Transitions are CLOSED → OPEN after `failure_threshold` consecutive
//! failures, OPEN → HALF_OPEN once `reset_timeout` has elapsed, and
//! HALF_OPEN → CLOSED on a successful trial or back to OPEN on a failed one.

use dashmap::DashMap;
use gateway_core::{system_clock, GatewayError, SharedClock};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, testing if the provider recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time to wait before letting a trial request through
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<u64>,
    next_attempt_time: u64,
    trial_in_flight: bool,
}

/// Circuit breaker for a single provider
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Provider identifier
    provider_id: String,
    /// Configuration
    config: CircuitBreakerConfig,
    /// Guarded state, every check-and-transition happens under this lock
    inner: Mutex<BreakerState>,
    clock: SharedClock,
}

impl CircuitBreaker {
    /// Create a new circuit breaker
    #[must_use]
    pub fn new(provider_id: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(provider_id, config, system_clock())
    }

    /// Create a circuit breaker reading time from `clock`
    #[must_use]
    pub fn with_clock(
        provider_id: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_time: None,
                next_attempt_time: 0,
                trial_in_flight: false,
            }),
            clock,
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults(provider_id: impl Into<String>) -> Self {
        Self::new(provider_id, CircuitBreakerConfig::default())
    }

    /// Get the provider ID
    #[must_use]
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Get the current state
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `operation` through the breaker.
    ///
    /// While the circuit is open and the reset timeout has not elapsed the
    /// operation is not invoked at all.
    ///
    /// # Errors
    /// Returns `GatewayError::ServiceUnavailable` when the circuit rejects the
    /// call, otherwise whatever the operation returned
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let permit = self.permit()?;
        let result = operation().await;
        match &result {
            Ok(_) => permit.success(),
            Err(error) => permit.failure(error),
        }
        result
    }

    /// Admit one call without settling its outcome.
    ///
    /// For operations whose result arrives later than their return value,
    /// such as a lazily opened stream. The caller reports the verdict through
    /// the permit; a permit dropped unsettled frees the half-open trial slot
    /// without counting either way.
    ///
    /// # Errors
    /// Returns `GatewayError::ServiceUnavailable` when the circuit is open
    pub fn permit(&self) -> Result<BreakerPermit<'_>, GatewayError> {
        self.acquire()?;
        Ok(BreakerPermit {
            breaker: self,
            settled: false,
        })
    }

    /// Admission check, transitions OPEN → HALF_OPEN when due
    fn acquire(&self) -> Result<(), GatewayError> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open if now < inner.next_attempt_time => Err(
                GatewayError::service_unavailable(
                    &self.provider_id,
                    Duration::from_millis(inner.next_attempt_time - now),
                ),
            ),
            CircuitState::Open => {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                info!(provider = %self.provider_id, "Circuit breaker half-open, testing");
                Ok(())
            }
            CircuitState::HalfOpen if inner.trial_in_flight => {
                Err(GatewayError::service_unavailable(&self.provider_id, Duration::ZERO))
            }
            CircuitState::HalfOpen => {
                inner.trial_in_flight = true;
                Ok(())
            }
        }
    }

    /// Record a successful request
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.trial_in_flight = false;
                info!(provider = %self.provider_id, "Circuit breaker closed");
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed request
    pub fn record_failure(&self) {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::Closed => {
                debug!(
                    provider = %self.provider_id,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker recorded failure"
                );
                if inner.failure_count >= self.config.failure_threshold {
                    self.open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                debug!(provider = %self.provider_id, "Circuit breaker half-open failure, reopening");
                self.open(&mut inner, now);
            }
            CircuitState::Open => {}
        }
    }

    /// A half-open trial ended without a verdict (e.g. cancelled)
    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn open(&self, inner: &mut BreakerState, now: u64) {
        inner.state = CircuitState::Open;
        inner.trial_in_flight = false;
        inner.next_attempt_time = now + self.config.reset_timeout.as_millis() as u64;
        warn!(
            provider = %self.provider_id,
            failures = inner.failure_count,
            retry_in_ms = self.config.reset_timeout.as_millis() as u64,
            "Circuit breaker opened"
        );
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.trial_in_flight = false;
        inner.next_attempt_time = 0;
    }

    /// Get current statistics
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            last_failure_time: inner.last_failure_time,
            next_attempt_time: (inner.state != CircuitState::Closed)
                .then_some(inner.next_attempt_time),
        }
    }
}

/// Admission to a breaker whose outcome is reported later
#[derive(Debug)]
#[must_use = "an unsettled permit counts neither as success nor failure"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl BreakerPermit<'_> {
    /// The upstream answered
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// The call failed; only provider-side failures are counted
    pub fn failure(mut self, error: &GatewayError) {
        self.settled = true;
        if error.counts_as_failure() {
            self.breaker.record_failure();
        } else {
            self.breaker.release_trial();
        }
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_trial();
        }
    }
}

/// Circuit breaker snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures
    pub failure_count: u32,
    /// Last failure, epoch millis
    pub last_failure_time: Option<u64>,
    /// Earliest trial time while not closed, epoch millis
    pub next_attempt_time: Option<u64>,
}

/// One breaker per provider, created on first use
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    clock: SharedClock,
}

impl CircuitBreakerRegistry {
    /// Create a registry handing out breakers with `config`
    #[must_use]
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            clock,
        }
    }

    /// Breaker for `provider`
    pub fn get_or_create(&self, provider: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::with_clock(
                    provider,
                    self.config.clone(),
                    Arc::clone(&self.clock),
                ))
            })
            .clone()
    }

    /// Snapshot of every breaker
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, CircuitBreakerStats)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::{Clock, ManualClock};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, reset: Duration) -> (CircuitBreaker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cb = CircuitBreaker::with_clock(
            "test-provider",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: reset,
            },
            clock.clone(),
        );
        (cb, clock)
    }

    fn upstream_failure() -> GatewayError {
        GatewayError::provider("test-provider", "boom", Some(500), true)
    }

    async fn fail(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<(), GatewayError> {
        cb.call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(upstream_failure())
        })
        .await
    }

    async fn succeed(cb: &CircuitBreaker, calls: &AtomicU32) -> Result<u32, GatewayError> {
        cb.call(|| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7)
        })
        .await
    }

    #[tokio::test]
    async fn test_circuit_breaker_initial_state() {
        let cb = CircuitBreaker::with_defaults("test-provider");
        assert_eq!(cb.state(), CircuitState::Closed);
        let calls = AtomicU32::new(0);
        assert_eq!(succeed(&cb, &calls).await.ok(), Some(7));
    }

    #[tokio::test]
    async fn test_open_circuit_fails_fast_without_calling() {
        let (cb, _clock) = breaker(3, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            assert!(fail(&cb, &calls).await.is_err());
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(fail(&cb, &calls).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let err = succeed(&cb, &calls).await.expect_err("fails fast");
        assert!(matches!(err, GatewayError::ServiceUnavailable { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_success_closes() {
        let (cb, clock) = breaker(2, Duration::from_millis(60_000));
        let calls = AtomicU32::new(0);

        let _ = fail(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_millis(59_999));
        assert!(succeed(&cb, &calls).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        clock.advance(Duration::from_millis(1));
        assert_eq!(succeed(&cb, &calls).await.ok(), Some(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stats = cb.stats();
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let (cb, clock) = breaker(2, Duration::from_secs(10));
        let calls = AtomicU32::new(0);

        let _ = fail(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;
        clock.advance(Duration::from_secs(10));

        assert!(fail(&cb, &calls).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let stats = cb.stats();
        assert_eq!(
            stats.next_attempt_time,
            Some(clock.now_millis() + 10_000),
        );

        assert!(succeed(&cb, &calls).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let (cb, _clock) = breaker(3, Duration::from_secs(60));
        let calls = AtomicU32::new(0);

        let _ = fail(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;
        let _ = succeed(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;
        let _ = fail(&cb, &calls).await;

        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_client_errors_do_not_trip() {
        let (cb, _clock) = breaker(1, Duration::from_secs(60));
        let result: Result<(), _> = cb
            .call(|| async { Err(GatewayError::validation("bad", None, "bad")) })
            .await;
        assert!(result.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_reset() {
        let (cb, _clock) = breaker(1, Duration::from_secs(60));
        let calls = AtomicU32::new(0);
        let _ = fail(&cb, &calls).await;
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(succeed(&cb, &calls).await.is_ok());
    }

    #[test]
    fn test_permit_counts_only_the_reported_outcome() {
        let (cb, _clock) = breaker(2, Duration::from_secs(60));

        // Admission alone does not reset the failure count.
        cb.permit().expect("closed").failure(&upstream_failure());
        drop(cb.permit().expect("closed"));
        assert_eq!(cb.stats().failure_count, 1);

        cb.permit().expect("closed").failure(&upstream_failure());
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(matches!(
            cb.permit(),
            Err(GatewayError::ServiceUnavailable { .. })
        ));
    }

    #[test]
    fn test_half_open_permit_failure_reopens() {
        let (cb, clock) = breaker(1, Duration::from_secs(10));
        cb.permit().expect("closed").failure(&upstream_failure());
        clock.advance(Duration::from_secs(10));

        let trial = cb.permit().expect("trial admitted");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.permit().is_err(), "one trial at a time");

        trial.failure(&upstream_failure());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.stats().next_attempt_time, Some(clock.now_millis() + 10_000));
    }

    #[test]
    fn test_unsettled_permit_frees_trial_slot() {
        let (cb, clock) = breaker(1, Duration::from_secs(10));
        cb.permit().expect("closed").failure(&upstream_failure());
        clock.advance(Duration::from_secs(10));

        drop(cb.permit().expect("trial admitted"));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.permit().expect("slot freed").success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_registry_shares_breakers() {
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), system_clock());
        let a = registry.get_or_create("openai");
        let b = registry.get_or_create("openai");
        let c = registry.get_or_create("groq");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(registry.snapshot().len(), 2);
    }
}
