use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Local-tier entry: serialized value plus its expiry instant.
#[derive(Clone)]
pub(crate) struct CacheEntry {
    value: String,
    pub(crate) expires_at: Instant,
}

/// Two-tier cache for derived listing views: in-memory DashMap in front of
/// Redis. A miss in both tiers falls through to the caller, which recomputes
/// from Postgres and writes back with `set`.
///
/// Local entries carry their own TTL and are dropped on read once stale;
/// the maintenance sweeper calls `evict_expired` for entries nobody reads.
#[derive(Clone)]
pub struct TieredCache {
    pub(crate) local: Arc<DashMap<String, CacheEntry>>,
    redis: ConnectionManager,
}

impl TieredCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            local: Arc::new(DashMap::new()),
            redis,
        }
    }

    /// Look a key up locally, then in Redis. A Redis hit repopulates the
    /// local tier with whatever TTL the key has left.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if let Some(entry) = self.local.get(key) {
            if Instant::now() < entry.expires_at {
                return serde_json::from_str(&entry.value).ok();
            }
            // stale: release the map ref before removing
            drop(entry);
            self.local.remove(key);
        }

        let mut conn = self.redis.clone();
        if let Ok(Some(v)) = conn.get::<_, Option<String>>(key).await {
            let ttl_secs: i64 = conn.ttl(key).await.unwrap_or(60);
            let ttl = if ttl_secs > 0 {
                Duration::from_secs(ttl_secs as u64)
            } else {
                Duration::from_secs(60)
            };
            self.local.insert(
                key.to_string(),
                CacheEntry {
                    value: v.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
            return serde_json::from_str(&v).ok();
        }

        None
    }

    /// Write a value to both tiers with the same TTL.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: u64,
    ) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        self.local.insert(
            key.to_string(),
            CacheEntry {
                value: json.clone(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );

        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(key, json, ttl_secs).await?;
        Ok(())
    }

    /// Drop derived keys from both tiers. Best-effort: a Redis failure is
    /// logged and swallowed — a stale listing beats a failed transition.
    pub async fn invalidate(&self, keys: &[String]) {
        for key in keys {
            self.local.remove(key);
        }

        let mut conn = self.redis.clone();
        for key in keys {
            if let Err(e) = conn.del::<_, ()>(key).await {
                tracing::warn!(key = %key, error = %e, "cache invalidation failed, leaving stale entry");
            } else {
                tracing::debug!(key = %key, "cache key invalidated");
            }
        }
    }

    /// Drop every local entry whose TTL has lapsed. Returns how many went.
    /// Driven by the maintenance sweeper.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.local.len();
        self.local.retain(|_, entry| entry.expires_at > now);
        before - self.local.len()
    }

    /// Number of entries currently resident in the local tier.
    pub fn local_len(&self) -> usize {
        self.local.len()
    }
}
