//! # Recommendation Cache Orchestrator
//!
//! Cache-aside in front of a recommender. Recommendations are advisory: a
//! cache that errors degrades to "compute, don't cache", a recommender that
//! errors degrades to no suggestions, and neither fails the caller.
//!
//! ```text
//! recommend(store, cart)
//!     │
//!     ▼
//! key = reco:{store}:{sorted, de-duplicated product ids}
//!     │
//!     ▼
//! cache.get(key) ──hit (decodable)──────────────────────────► return cached
//!     │ miss / error / undecodable
//!     ▼
//! recommender.recommend(store, ids, limit) ──error──► return empty, not cached
//!     │
//!     ├──► cache.set(key, payload, ttl)   inline or spawned, errors logged
//!     ▼
//! return fresh
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::RecommendationCache;
use crate::config::PopulateMode;
use tally_core::validation::validate_id;
use tally_core::{CoreResult, Repository};

/// A suggested product with its affinity score.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    pub product_id: String,
    pub score: i64,
}

/// The payload returned to callers and stored in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendations {
    pub store_id: String,
    pub items: Vec<Suggestion>,
}

impl Recommendations {
    pub fn empty(store_id: &str) -> Self {
        Recommendations {
            store_id: store_id.to_string(),
            items: Vec::new(),
        }
    }
}

/// Computes suggestions from a store's history. Treated as a pure function
/// of store and cart.
#[async_trait]
pub trait Recommender: Send + Sync {
    async fn recommend(&self, store_id: &str, product_ids: &[String], limit: u32) -> CoreResult<Vec<Suggestion>>;
}

/// Co-purchase affinity over the store's non-voided transactions.
pub struct HistoryRecommender {
    repo: Arc<dyn Repository>,
}

impl HistoryRecommender {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        HistoryRecommender { repo }
    }
}

#[async_trait]
impl Recommender for HistoryRecommender {
    async fn recommend(&self, store_id: &str, product_ids: &[String], limit: u32) -> CoreResult<Vec<Suggestion>> {
        let co = self.repo.co_purchases(store_id, product_ids, limit).await?;
        Ok(co
            .into_iter()
            .map(|c| Suggestion {
                product_id: c.product_id,
                score: c.score,
            })
            .collect())
    }
}

/// Sorted, de-duplicated product ids. Cart order never changes the key.
fn normalize(product_ids: &[String]) -> Vec<String> {
    product_ids
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn cache_key(store_id: &str, product_ids: &[String]) -> String {
    format!("reco:{}:{}", store_id, normalize(product_ids).join(","))
}

pub struct RecommendationOrchestrator {
    recommender: Arc<dyn Recommender>,
    cache: Arc<dyn RecommendationCache>,
    ttl: Duration,
    limit: u32,
    populate: PopulateMode,
    enabled: bool,
}

impl RecommendationOrchestrator {
    pub fn new(
        recommender: Arc<dyn Recommender>,
        cache: Arc<dyn RecommendationCache>,
        ttl: Duration,
        limit: u32,
        populate: PopulateMode,
    ) -> Self {
        RecommendationOrchestrator {
            recommender,
            cache,
            ttl,
            limit,
            populate,
            enabled: true,
        }
    }

    /// Turns recommendations off: every call returns an empty payload.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub async fn recommend(&self, store_id: &str, product_ids: &[String]) -> CoreResult<Recommendations> {
        validate_id("store_id", store_id)?;
        for id in product_ids {
            validate_id("product_id", id)?;
        }

        let ids = normalize(product_ids);
        if !self.enabled || ids.is_empty() {
            return Ok(Recommendations::empty(store_id));
        }

        let key = cache_key(store_id, &ids);

        match self.cache.get(&key).await {
            Ok(Some(payload)) => match serde_json::from_str::<Recommendations>(&payload) {
                Ok(cached) => {
                    debug!(key = %key, "Recommendation cache hit");
                    return Ok(cached);
                }
                Err(e) => warn!(key = %key, error = %e, "Discarding undecodable cached recommendations"),
            },
            Ok(None) => debug!(key = %key, "Recommendation cache miss"),
            Err(e) => warn!(key = %key, error = %e, "Recommendation cache read failed, computing uncached"),
        }

        let items = match self.recommender.recommend(store_id, &ids, self.limit).await {
            Ok(items) => items,
            Err(e) => {
                warn!(key = %key, error = %e, "Recommender failed, returning no suggestions");
                return Ok(Recommendations::empty(store_id));
            }
        };
        let fresh = Recommendations {
            store_id: store_id.to_string(),
            items,
        };

        match serde_json::to_string(&fresh) {
            Ok(payload) => self.populate(key, payload).await,
            Err(e) => warn!(key = %key, error = %e, "Failed to encode recommendations for caching"),
        }

        Ok(fresh)
    }

    async fn populate(&self, key: String, payload: String) {
        match self.populate {
            PopulateMode::Inline => store(self.cache.as_ref(), &key, &payload, self.ttl).await,
            PopulateMode::Background => {
                let cache = self.cache.clone();
                let ttl = self.ttl;
                tokio::spawn(async move {
                    store(cache.as_ref(), &key, &payload, ttl).await;
                });
            }
        }
    }
}

async fn store(cache: &dyn RecommendationCache, key: &str, payload: &str, ttl: Duration) {
    if let Err(e) = cache.set(key, payload, ttl).await {
        warn!(key, error = %e, "Recommendation cache write failed");
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, NoopCache};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tally_core::CoreError;

    /// Suggests every other product of a fixed catalog, counting calls.
    struct FixedRecommender {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Recommender for FixedRecommender {
        async fn recommend(&self, _store: &str, ids: &[String], limit: u32) -> CoreResult<Vec<Suggestion>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(["p-x", "p-y", "p-z"]
                .iter()
                .filter(|p| !ids.iter().any(|id| id == *p))
                .take(limit as usize)
                .enumerate()
                .map(|(i, p)| Suggestion {
                    product_id: p.to_string(),
                    score: 10 - i as i64,
                })
                .collect())
        }
    }

    fn orchestrator(cache: Arc<dyn RecommendationCache>) -> (RecommendationOrchestrator, Arc<FixedRecommender>) {
        let recommender = Arc::new(FixedRecommender {
            calls: AtomicU32::new(0),
        });
        let orch = RecommendationOrchestrator::new(
            recommender.clone(),
            cache,
            Duration::from_secs(300),
            5,
            PopulateMode::Inline,
        );
        (orch, recommender)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        assert_eq!(
            cache_key("s-1", &ids(&["p-b", "p-a", "p-b"])),
            cache_key("s-1", &ids(&["p-a", "p-b"]))
        );
        assert_eq!(cache_key("s-1", &ids(&["p-b", "p-a"])), "reco:s-1:p-a,p-b");
        assert_ne!(cache_key("s-1", &ids(&["p-a"])), cache_key("s-2", &ids(&["p-a"])));
    }

    #[tokio::test]
    async fn test_hit_skips_recommender() {
        let (orch, rec) = orchestrator(Arc::new(MemoryCache::new()));

        let first = orch.recommend("s-1", &ids(&["p-y", "p-a"])).await.unwrap();
        let second = orch.recommend("s-1", &ids(&["p-a", "p-y"])).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(rec.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_cache_still_computes() {
        let (orch, rec) = orchestrator(Arc::new(MemoryCache::failing()));
        let (reference, _) = orchestrator(Arc::new(NoopCache));

        let out = orch.recommend("s-1", &ids(&["p-a"])).await.unwrap();
        assert_eq!(out, reference.recommend("s-1", &ids(&["p-a"])).await.unwrap());
        assert_eq!(out.items.len(), 3);
        assert_eq!(rec.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_miss() {
        let cache = Arc::new(MemoryCache::new());
        let key = cache_key("s-1", &ids(&["p-a"]));
        cache.set(&key, "not json", Duration::from_secs(60)).await.unwrap();

        let (orch, rec) = orchestrator(cache.clone());
        let out = orch.recommend("s-1", &ids(&["p-a"])).await.unwrap();
        assert_eq!(out.items[0].product_id, "p-x");
        assert_eq!(rec.calls.load(Ordering::SeqCst), 1);

        // Overwritten with a good payload
        let stored = cache.get(&key).await.unwrap().unwrap();
        assert_eq!(serde_json::from_str::<Recommendations>(&stored).unwrap(), out);
    }

    #[tokio::test]
    async fn test_background_populate_lands_eventually() {
        let cache = Arc::new(MemoryCache::new());
        let recommender = Arc::new(FixedRecommender {
            calls: AtomicU32::new(0),
        });
        let orch = RecommendationOrchestrator::new(
            recommender,
            cache.clone(),
            Duration::from_secs(300),
            2,
            PopulateMode::Background,
        );

        let out = orch.recommend("s-1", &ids(&["p-a"])).await.unwrap();
        assert_eq!(out.items.len(), 2);

        for _ in 0..100 {
            if !cache.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_cart_and_disabled() {
        let (orch, rec) = orchestrator(Arc::new(MemoryCache::new()));
        assert!(orch.recommend("s-1", &[]).await.unwrap().items.is_empty());

        let orch = orch.disabled();
        assert!(orch.recommend("s-1", &ids(&["p-a"])).await.unwrap().items.is_empty());
        assert_eq!(rec.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_recommender_errors_degrade_to_empty() {
        struct Broken;

        #[async_trait]
        impl Recommender for Broken {
            async fn recommend(&self, _: &str, _: &[String], _: u32) -> CoreResult<Vec<Suggestion>> {
                Err(CoreError::Unavailable("history offline".into()))
            }
        }

        let cache = Arc::new(MemoryCache::new());
        let orch = RecommendationOrchestrator::new(
            Arc::new(Broken),
            cache.clone(),
            Duration::from_secs(60),
            5,
            PopulateMode::Inline,
        );

        let out = orch.recommend("s-1", &ids(&["p-a"])).await.unwrap();
        assert_eq!(out, Recommendations::empty("s-1"));
        // The degraded answer is not cached
        assert!(cache.is_empty());

        // Malformed ids are still the caller's error
        assert!(orch.recommend("s-1", &ids(&[""])).await.is_err());
    }
}
