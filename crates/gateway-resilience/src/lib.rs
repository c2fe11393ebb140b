//! # Gateway Resilience
//!
//! Resilience patterns for the LLM Chat Gateway:
//! - Circuit breaker per provider, preventing cascading failures
//! - Retry policy with exponential backoff
//! - Fixed-window rate limiting over provider, model and user keys
//! - TTL response cache with a pluggable backend
//!
//! Every time-dependent primitive reads time through an injected
//! [`gateway_core::Clock`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod circuit_breaker;
pub mod rate_limit;
pub mod retry;

// Re-export main types
pub use cache::{CacheBackend, CacheError, CacheService, CacheStats, MemoryCacheBackend};
pub use circuit_breaker::{
    BreakerPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitBreakerStats, CircuitState,
};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimitService, WindowLimit};
pub use retry::{RetryConfig, RetryPolicy, RetryPolicyBuilder};
