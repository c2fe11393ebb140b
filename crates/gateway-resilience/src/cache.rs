//! TTL cache for buffered completions.
//!
//! [`CacheService`] is the only thing the orchestrator talks to. It
//! serializes values to JSON and hands bytes to a [`CacheBackend`]. Backend
//! trouble never reaches the caller: reads degrade to a miss and writes are
//! logged and counted.

use async_trait::async_trait;
use gateway_core::SharedClock;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Error types for cache backends
#[derive(Debug, Error)]
pub enum CacheError {
    /// Value could not be (de)serialized
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// Backend not available
    #[error("Cache backend not available: {0}")]
    Unavailable(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Storage behind the cache service
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a live value
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store a value that expires after `ttl`
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()>;

    /// Remove a key
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

#[derive(Debug)]
struct Entry {
    data: Vec<u8>,
    expires_at: u64,
    hits: u64,
}

/// In-memory backend with a capacity bound
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, Entry>>,
    max_entries: usize,
    clock: SharedClock,
}

impl MemoryCacheBackend {
    /// Create a backend holding at most `max_entries` keys
    #[must_use]
    pub fn new(max_entries: usize, clock: SharedClock) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            clock,
        }
    }

    /// Number of stored entries, expired ones included until they are touched
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the backend is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_if_needed(entries: &mut HashMap<String, Entry>, max_entries: usize, now: u64) {
        entries.retain(|_, entry| entry.expires_at > now);

        if entries.len() >= max_entries {
            let to_remove = entries.len() - max_entries + 1;
            let mut by_hits: Vec<(String, u64)> =
                entries.iter().map(|(k, v)| (k.clone(), v.hits)).collect();
            by_hits.sort_by_key(|(_, hits)| *hits);

            for (key, _) in by_hits.into_iter().take(to_remove) {
                entries.remove(&key);
            }
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(key) {
            if entry.expires_at <= now {
                entries.remove(key);
                return Ok(None);
            }
            entry.hits += 1;
            return Ok(Some(entry.data.clone()));
        }

        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CacheResult<()> {
        let now = self.clock.now_millis();
        let mut entries = self.entries.lock();

        if !entries.contains_key(key) {
            Self::evict_if_needed(&mut entries, self.max_entries, now);
        }
        entries.insert(
            key.to_string(),
            Entry {
                data: value,
                expires_at: now + ttl.as_millis() as u64,
                hits: 0,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups that found a value
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Failed writes
    pub set_failures: u64,
}

/// Cache facade used by the orchestrator
pub struct CacheService {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    set_failures: AtomicU64,
}

impl CacheService {
    /// Create a service over a backend
    #[must_use]
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            set_failures: AtomicU64::new(0),
        }
    }

    /// In-memory service
    #[must_use]
    pub fn in_memory(max_entries: usize, default_ttl: Duration, clock: SharedClock) -> Self {
        Self::new(
            Arc::new(MemoryCacheBackend::new(max_entries, clock)),
            default_ttl,
        )
    }

    /// TTL used by [`Self::set_default`]
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up a value. Missing, expired, undecodable or unreachable all
    /// read as `None`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                warn!(backend = self.backend.name(), error = %e, "Cache get failed");
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                let _ = self.backend.delete(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a value. Failures are logged and counted, never returned.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let data = match serde_json::to_vec(value) {
            Ok(data) => data,
            Err(e) => {
                self.set_failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "Failed to serialize cache entry");
                return;
            }
        };

        if let Err(e) = self.backend.set(key, data, ttl).await {
            self.set_failures.fetch_add(1, Ordering::Relaxed);
            warn!(backend = self.backend.name(), key = %key, error = %e, "Cache set failed");
            return;
        }
        debug!(key = %key, ttl_ms = ttl.as_millis() as u64, "Response cached");
    }

    /// Store with the default TTL
    pub async fn set_default<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.set(key, value, self.default_ttl).await;
    }

    /// Remove a key
    pub async fn del(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            warn!(backend = self.backend.name(), key = %key, error = %e, "Cache delete failed");
        }
    }

    /// Counter snapshot
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            set_failures: self.set_failures.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("backend", &self.backend.name())
            .field("default_ttl", &self.default_ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::ManualClock;

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
            Err(CacheError::Unavailable("down".to_string()))
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::Unavailable("down".to_string()))
        }

        async fn delete(&self, _key: &str) -> CacheResult<()> {
            Ok(())
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn service() -> (CacheService, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let service = CacheService::in_memory(16, Duration::from_secs(300), clock.clone());
        (service, clock)
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let (cache, clock) = service();
        cache
            .set("k", &"v".to_string(), Duration::from_millis(1_000))
            .await;

        clock.set(999);
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));

        clock.set(1_001);
        assert_eq!(cache.get::<String>("k").await, None);
    }

    #[tokio::test]
    async fn test_del_and_stats() {
        let (cache, _) = service();
        cache.set_default("k", &42_u32).await;
        assert_eq!(cache.get::<u32>("k").await, Some(42));

        cache.del("k").await;
        assert_eq!(cache.get::<u32>("k").await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_type_mismatch_reads_as_miss() {
        let (cache, _) = service();
        cache.set_default("k", &"not a number").await;
        assert_eq!(cache.get::<u32>("k").await, None);
    }

    #[tokio::test]
    async fn test_backend_failures_are_swallowed() {
        let cache = CacheService::new(Arc::new(BrokenBackend), Duration::from_secs(1));
        cache.set_default("k", &1_u8).await;
        assert_eq!(cache.get::<u8>("k").await, None);
        assert_eq!(cache.stats().set_failures, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_hit() {
        let clock = Arc::new(ManualClock::new(0));
        let backend = MemoryCacheBackend::new(2, clock);
        let ttl = Duration::from_secs(60);

        backend.set("a", vec![1], ttl).await.expect("set");
        backend.set("b", vec![2], ttl).await.expect("set");
        backend.get("a").await.expect("get");
        backend.set("c", vec![3], ttl).await.expect("set");

        assert_eq!(backend.len(), 2);
        assert!(backend.get("a").await.expect("get").is_some());
        assert!(backend.get("b").await.expect("get").is_none());
    }
}
