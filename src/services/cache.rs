use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::MatchScore;

/// Errors that can occur with cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    RedisError(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Two-tier cache of match scores
///
/// L1 is an in-process moka cache; L2 is an optional Redis shared across
/// instances. The cache is never authoritative: any error reads as a miss and
/// the caller recomputes.
pub struct ScoreCache {
    redis: Option<Arc<tokio::sync::Mutex<ConnectionManager>>>,
    l1_cache: moka::future::Cache<String, Arc<MatchScore>>,
    ttl_secs: u64,
}

impl ScoreCache {
    /// In-process cache only
    pub fn in_memory(l1_size: u64, ttl_secs: u64) -> Self {
        Self {
            redis: None,
            l1_cache: build_l1(l1_size, ttl_secs),
            ttl_secs,
        }
    }

    /// L1 backed by a shared Redis tier
    pub async fn with_redis(redis_url: &str, l1_size: u64, ttl_secs: u64) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        let redis = redis::aio::ConnectionManager::new(client).await?;

        Ok(Self {
            redis: Some(Arc::new(tokio::sync::Mutex::new(redis))),
            l1_cache: build_l1(l1_size, ttl_secs),
            ttl_secs,
        })
    }

    /// Cached score for the pair, if any; validity is the caller's check
    pub async fn get(&self, listing_id: Uuid, profile_id: &str) -> Option<MatchScore> {
        let key = CacheKey::score(listing_id, profile_id);

        if let Some(score) = self.l1_cache.get(&key).await {
            tracing::trace!("L1 cache hit: {}", key);
            return Some((*score).clone());
        }

        match self.get_l2(&key).await {
            Ok(Some(score)) => {
                tracing::trace!("L2 cache hit: {}", key);
                self.l1_cache.insert(key, Arc::new(score.clone())).await;
                Some(score)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::debug!(error = %e, key = %key, "Score cache read failed, recomputing");
                None
            }
        }
    }

    pub async fn put(&self, score: &MatchScore) {
        let key = CacheKey::score(score.listing_id, &score.profile_id);
        self.l1_cache.insert(key.clone(), Arc::new(score.clone())).await;

        if let Err(e) = self.set_l2(&key, score).await {
            tracing::debug!(error = %e, key = %key, "Score cache write failed");
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.l1_cache.entry_count()
    }

    async fn get_l2(&self, key: &str) -> Result<Option<MatchScore>, CacheError> {
        let Some(redis) = &self.redis else {
            return Ok(None);
        };

        let mut conn = redis.lock().await;
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut *conn).await?;
        drop(conn);

        Ok(value.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    async fn set_l2(&self, key: &str, score: &MatchScore) -> Result<(), CacheError> {
        let Some(redis) = &self.redis else {
            return Ok(());
        };

        let json = serde_json::to_string(score)?;
        let mut conn = redis.lock().await;
        redis::cmd("SETEX")
            .arg(key)
            .arg(self.ttl_secs)
            .arg(json)
            .query_async::<()>(&mut *conn)
            .await?;

        Ok(())
    }
}

fn build_l1(l1_size: u64, ttl_secs: u64) -> moka::future::Cache<String, Arc<MatchScore>> {
    moka::future::CacheBuilder::new(l1_size)
        .time_to_live(Duration::from_secs(ttl_secs))
        .build()
}

/// Cache key builder
pub struct CacheKey;

impl CacheKey {
    /// Build a cache key for a (listing, profile) match score
    pub fn score(listing_id: Uuid, profile_id: &str) -> String {
        format!("score:{}:{}", listing_id, profile_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScoreBreakdown;
    use chrono::Utc;

    fn score(listing_id: Uuid) -> MatchScore {
        MatchScore {
            listing_id,
            profile_id: "p1".to_string(),
            score: 0.7,
            computed_at: Utc::now(),
            breakdown: ScoreBreakdown::default(),
            listing_version: 1,
            profile_updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_put_get() {
        let cache = ScoreCache::in_memory(100, 60);
        let id = Uuid::new_v4();
        assert!(cache.get(id, "p1").await.is_none());

        cache.put(&score(id)).await;
        let cached = cache.get(id, "p1").await.unwrap();
        assert_eq!(cached.score, 0.7);
        assert!(cache.get(id, "p2").await.is_none());
    }

    #[tokio::test]
    #[ignore = "Requires Redis"]
    async fn test_redis_tier_round_trip() {
        let cache = ScoreCache::with_redis("redis://127.0.0.1:6379", 10, 60)
            .await
            .expect("Failed to create cache");
        let id = Uuid::new_v4();
        cache.put(&score(id)).await;

        let other = ScoreCache::with_redis("redis://127.0.0.1:6379", 10, 60)
            .await
            .expect("Failed to create cache");
        assert_eq!(other.get(id, "p1").await.unwrap().listing_id, id);
    }

    #[test]
    fn test_cache_key_builder() {
        let id = Uuid::nil();
        assert_eq!(
            CacheKey::score(id, "user123"),
            "score:00000000-0000-0000-0000-000000000000:user123"
        );
    }
}
