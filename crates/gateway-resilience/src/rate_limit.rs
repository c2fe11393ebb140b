//! Fixed-window rate limiting.
//!
//! Each key owns a window `{start, count, max, window}`. A check reads and
//! increments the window under that key's lock, so two concurrent checks can
//! never both take the last slot. Admission charges its keys all or nothing.
//! Checks never block waiting for capacity.

use dashmap::DashMap;
use gateway_core::{GatewayError, SharedClock};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Limit for one keyspace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLimit {
    /// Requests allowed per window
    pub max: u32,
    /// Window length
    pub window: Duration,
}

impl WindowLimit {
    /// Create a limit
    #[must_use]
    pub const fn new(max: u32, window: Duration) -> Self {
        Self { max, window }
    }
}

/// Per-keyspace limits
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Limit per provider
    pub provider: WindowLimit,
    /// Limit per qualified model
    pub model: WindowLimit,
    /// Limit per end user
    pub user: WindowLimit,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            provider: WindowLimit::new(600, Duration::from_secs(60)),
            model: WindowLimit::new(300, Duration::from_secs(60)),
            user: WindowLimit::new(30, Duration::from_secs(60)),
        }
    }
}

/// Outcome of a single check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request was admitted
    pub allowed: bool,
    /// Slots left in the current window
    pub remaining: u32,
    /// Time until the window resets
    pub retry_after: Duration,
}

#[derive(Debug)]
struct Window {
    window_start: u64,
    count: u32,
    max: u32,
    window_ms: u64,
}

impl Window {
    fn expired(&self, now: u64) -> bool {
        now.saturating_sub(self.window_start) >= self.window_ms
    }

    /// Start a fresh window if this one lapsed or its limit changed
    fn roll(&mut self, max: u32, window_ms: u64, now: u64) {
        if self.expired(now) || self.max != max || self.window_ms != window_ms {
            self.window_start = now;
            self.count = 0;
            self.max = max;
            self.window_ms = window_ms;
        }
    }

    fn retry_after(&self, now: u64) -> Duration {
        Duration::from_millis((self.window_start + self.window_ms).saturating_sub(now))
    }
}

/// Multi-key fixed-window rate limiter
pub struct RateLimitService {
    config: RateLimitConfig,
    windows: DashMap<String, Arc<Mutex<Window>>>,
    clock: SharedClock,
}

impl RateLimitService {
    /// Create a limiter
    #[must_use]
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            clock,
        }
    }

    fn window(&self, key: &str, limit: WindowLimit, now: u64) -> Arc<Mutex<Window>> {
        let window_ms = limit.window.as_millis() as u64;
        // Clone the Arc out so the map shard is not held while counting.
        self.windows
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Window {
                    window_start: now,
                    count: 0,
                    max: limit.max,
                    window_ms,
                }))
            })
            .clone()
    }

    /// Check and consume one slot for `key`
    pub fn check_limit(&self, key: &str, max: u32, window: Duration) -> RateLimitDecision {
        let now = self.clock.now_millis();
        let entry = self.window(key, WindowLimit::new(max, window), now);
        let mut w = entry.lock();
        w.roll(max, window.as_millis() as u64, now);

        let retry_after = w.retry_after(now);
        if w.count >= w.max {
            debug!(key = %key, count = w.count, max = w.max, "Rate limit window exhausted");
            return RateLimitDecision {
                allowed: false,
                remaining: 0,
                retry_after,
            };
        }

        w.count += 1;
        RateLimitDecision {
            allowed: true,
            remaining: w.max - w.count,
            retry_after,
        }
    }

    /// Run the provider, model and user checks.
    ///
    /// All windows are locked and checked before any is charged, so a denied
    /// request consumes no slot anywhere. The first denial in provider,
    /// model, user order is returned. `model` is the qualified
    /// `provider/model` id.
    ///
    /// # Errors
    /// Returns `RateLimited` with the scope and reset time of the denying key
    pub fn admit(
        &self,
        provider: &str,
        model: &str,
        user: Option<&str>,
    ) -> Result<(), GatewayError> {
        let now = self.clock.now_millis();
        let mut keys = vec![
            (format!("provider:{provider}"), self.config.provider),
            (format!("model:{model}"), self.config.model),
        ];
        if let Some(user) = user {
            keys.push((format!("user:{user}"), self.config.user));
        }

        let entries: Vec<_> = keys
            .iter()
            .map(|(key, limit)| self.window(key, *limit, now))
            .collect();
        // Keys are locked in the same order on every call.
        let mut guards: Vec<_> = entries.iter().map(|entry| entry.lock()).collect();

        for ((key, limit), w) in keys.iter().zip(guards.iter_mut()) {
            w.roll(limit.max, limit.window.as_millis() as u64, now);
            if w.count >= w.max {
                let retry_after = w.retry_after(now);
                warn!(key = %key, retry_after_ms = retry_after.as_millis() as u64, "Rate limited");
                return Err(GatewayError::rate_limited(key.clone(), retry_after));
            }
        }
        for w in &mut guards {
            w.count += 1;
        }
        Ok(())
    }

    /// Drop windows that have already rolled over
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.lock().expired(now));
        before - self.windows.len()
    }

    /// Number of tracked keys
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl std::fmt::Debug for RateLimitService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitService")
            .field("config", &self.config)
            .field("tracked_keys", &self.windows.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::ManualClock;

    fn limiter(config: RateLimitConfig) -> (RateLimitService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        (RateLimitService::new(config, clock.clone()), clock)
    }

    #[test]
    fn test_window_allows_max_then_denies() {
        let (limiter, clock) = limiter(RateLimitConfig::default());
        let window = Duration::from_millis(60_000);

        for i in 0..10 {
            let d = limiter.check_limit("user:u1", 10, window);
            assert!(d.allowed, "call {} should pass", i + 1);
            assert_eq!(d.remaining, 9 - i);
        }

        let denied = limiter.check_limit("user:u1", 10, window);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_millis(60_000));

        clock.advance(Duration::from_millis(30_000));
        let denied = limiter.check_limit("user:u1", 10, window);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Duration::from_millis(30_000));

        clock.advance(Duration::from_millis(30_000));
        assert!(limiter.check_limit("user:u1", 10, window).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _) = limiter(RateLimitConfig::default());
        let window = Duration::from_secs(60);

        assert!(limiter.check_limit("user:a", 1, window).allowed);
        assert!(!limiter.check_limit("user:a", 1, window).allowed);
        assert!(limiter.check_limit("user:b", 1, window).allowed);
    }

    #[test]
    fn test_admit_reports_denying_scope() {
        let config = RateLimitConfig {
            user: WindowLimit::new(1, Duration::from_secs(60)),
            ..Default::default()
        };
        let (limiter, _) = limiter(config);

        assert!(limiter.admit("openai", "openai/gpt-4o", Some("u1")).is_ok());
        let err = limiter
            .admit("openai", "openai/gpt-4o", Some("u1"))
            .expect_err("user limit reached");
        match err {
            GatewayError::RateLimited { scope, retry_after } => {
                assert_eq!(scope, "user:u1");
                assert_eq!(retry_after, Duration::from_secs(60));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Anonymous requests skip the user keyspace.
        assert!(limiter.admit("openai", "openai/gpt-4o", None).is_ok());
    }

    #[test]
    fn test_denied_admission_charges_no_window() {
        let config = RateLimitConfig {
            provider: WindowLimit::new(2, Duration::from_secs(60)),
            model: WindowLimit::new(2, Duration::from_secs(60)),
            user: WindowLimit::new(1, Duration::from_secs(60)),
        };
        let (limiter, _) = limiter(config);

        assert!(limiter.admit("openai", "openai/gpt-4o", Some("u1")).is_ok());
        for _ in 0..5 {
            assert!(limiter.admit("openai", "openai/gpt-4o", Some("u1")).is_err());
        }

        // The rejected calls left one provider and one model slot free.
        assert!(limiter.admit("openai", "openai/gpt-4o", Some("u2")).is_ok());
        let err = limiter
            .admit("openai", "openai/gpt-4o", Some("u3"))
            .expect_err("provider exhausted");
        assert!(matches!(err, GatewayError::RateLimited { ref scope, .. } if scope == "provider:openai"));
        assert!(limiter.check_limit("user:u3", 1, Duration::from_secs(60)).allowed);
    }

    #[test]
    fn test_purge_expired() {
        let (limiter, clock) = limiter(RateLimitConfig::default());
        limiter.check_limit("a", 5, Duration::from_secs(1));
        limiter.check_limit("b", 5, Duration::from_secs(10));

        clock.advance(Duration::from_secs(2));
        assert_eq!(limiter.purge_expired(), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[test]
    fn test_concurrent_checks_never_overshoot() {
        let (limiter, _) = limiter(RateLimitConfig::default());
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..50)
                        .filter(|_| {
                            limiter
                                .check_limit("shared", 100, Duration::from_secs(60))
                                .allowed
                        })
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .sum();
        assert_eq!(admitted, 100);
    }
}
