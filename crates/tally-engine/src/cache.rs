//! # Recommendation Cache
//!
//! The cache port used by the recommendation orchestrator, plus three
//! implementations that can be swapped without changing checkout behavior.
//!
//! ```text
//! ┌──────────────────────────┐
//! │  RecommendationCache     │  get(key) / set(key, payload, ttl), both fallible
//! └────────────┬─────────────┘
//!      ┌───────┼──────────────────┐
//!      ▼       ▼                  ▼
//!  RedisCache  MemoryCache        NoopCache
//!  (shared)    (in process, TTL)  (always miss)
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::Instant;
use tracing::info;

use tally_core::{CoreError, CoreResult};

#[async_trait]
pub trait RecommendationCache: Send + Sync {
    /// The cached payload, or `None` on a miss.
    async fn get(&self, key: &str) -> CoreResult<Option<String>>;

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> CoreResult<()>;
}

fn unavailable(e: redis::RedisError) -> CoreError {
    CoreError::Unavailable(format!("redis: {}", e))
}

// =============================================================================
// Redis
// =============================================================================

/// Redis-backed cache. The connection manager reconnects on its own after
/// a dropped connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    pub async fn connect(url: &str) -> CoreResult<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = ConnectionManager::new(client).await.map_err(unavailable)?;
        info!("Connected to Redis recommendation cache");
        Ok(RedisCache { conn })
    }
}

#[async_trait]
impl RecommendationCache for RedisCache {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(unavailable)
    }

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> CoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, payload, ttl.as_secs().max(1))
            .await
            .map_err(unavailable)?;
        Ok(())
    }
}

// =============================================================================
// In-process
// =============================================================================

const DEFAULT_MEMORY_CAPACITY: usize = 4096;

/// In-process cache with per-entry expiry.
///
/// Once `capacity` entries are stored, a `set` first drops every expired
/// entry and then, if still full, the entry closest to expiry.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    capacity: usize,
    failing: bool,
}

impl Default for MemoryCache {
    fn default() -> Self {
        MemoryCache::with_capacity(DEFAULT_MEMORY_CAPACITY)
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        MemoryCache {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            failing: false,
        }
    }

    /// A cache whose every call fails with `Unavailable`.
    pub fn failing() -> Self {
        MemoryCache {
            failing: true,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|(_, expires)| *expires > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> CoreResult<()> {
        if self.failing {
            Err(CoreError::Unavailable("cache offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RecommendationCache for MemoryCache {
    async fn get(&self, key: &str) -> CoreResult<Option<String>> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((payload, expires)) if *expires > Instant::now() => Ok(Some(payload.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> CoreResult<()> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if entries.len() >= self.capacity && !entries.contains_key(key) {
            entries.retain(|_, (_, expires)| *expires > now);

            if entries.len() >= self.capacity {
                let soonest = entries
                    .iter()
                    .min_by_key(|(_, (_, expires))| *expires)
                    .map(|(k, _)| k.clone());
                if let Some(k) = soonest {
                    entries.remove(&k);
                }
            }
        }

        entries.insert(key.to_string(), (payload.to_string(), now + ttl));
        Ok(())
    }
}

// =============================================================================
// No-op
// =============================================================================

/// Always misses, never stores.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait]
impl RecommendationCache for NoopCache {
    async fn get(&self, _key: &str) -> CoreResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _payload: &str, _ttl: Duration) -> CoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::ErrorKind;

    #[tokio::test(start_paused = true)]
    async fn test_memory_cache_expires() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    fn stored(cache: &MemoryCache) -> usize {
        cache.entries.lock().unwrap().len()
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_prunes_expired_entries_when_full() {
        let cache = MemoryCache::with_capacity(1000);
        for i in 0..1000 {
            cache.set(&format!("k-{}", i), "v", Duration::from_secs(1)).await.unwrap();
        }
        assert_eq!(stored(&cache), 1000);

        tokio::time::advance(Duration::from_secs(10)).await;
        cache.set("fresh", "v", Duration::from_secs(60)).await.unwrap();

        assert_eq!(stored(&cache), 1);
        assert_eq!(cache.get("fresh").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_entries_never_exceed_capacity() {
        let cache = MemoryCache::with_capacity(3);
        for (i, secs) in [30u64, 10, 20].into_iter().enumerate() {
            cache.set(&format!("k-{}", i), "v", Duration::from_secs(secs)).await.unwrap();
        }

        cache.set("k-3", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(stored(&cache), 3);
        // k-1 was closest to expiry
        assert_eq!(cache.get("k-1").await.unwrap(), None);
        assert!(cache.get("k-0").await.unwrap().is_some());

        // Overwriting a stored key evicts nothing
        cache.set("k-0", "w", Duration::from_secs(60)).await.unwrap();
        assert_eq!(stored(&cache), 3);
        assert_eq!(cache.get("k-2").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_failing_cache_reports_unavailable() {
        let cache = MemoryCache::failing();
        let err = cache.get("k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unavailable);
        assert!(cache.set("k", "v", Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_noop_always_misses() {
        let cache = NoopCache;
        cache.set("k", "v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
