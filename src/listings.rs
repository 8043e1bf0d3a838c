//! Derived public listing views and their cache keys.
//!
//! Keys are deterministic functions of the entity kind and the view
//! parameterization, so the invalidator can name every key a transition may
//! have staled without consulting the cache.

use crate::cache::TieredCache;
use crate::models::request::RequestKind;
use crate::store::postgres::{ListingEntry, PgStore};

/// Top-N sizes the marketplace front end actually renders. Bounded so the
/// invalidator can enumerate every parameterized key.
pub const FEATURED_TOP_SIZES: &[i64] = &[5, 10, 20];

pub fn featured_top_key(n: i64) -> String {
    format!("listings:featured:top:{}", n)
}

pub fn active_ads_key() -> String {
    "listings:ads:active".to_string()
}

/// Every cache key a transition on `kind` may have staled.
pub fn keys_for_kind(kind: RequestKind) -> Vec<String> {
    match kind {
        RequestKind::FeaturedRequest => {
            FEATURED_TOP_SIZES.iter().map(|n| featured_top_key(*n)).collect()
        }
        RequestKind::Ad => vec![active_ads_key()],
        RequestKind::ServiceRequest => vec![],
    }
}

/// Read-through cached listing queries.
#[derive(Clone)]
pub struct Listings {
    store: PgStore,
    cache: TieredCache,
    ttl_secs: u64,
}

impl Listings {
    pub fn new(store: PgStore, cache: TieredCache, ttl_secs: u64) -> Self {
        Self {
            store,
            cache,
            ttl_secs,
        }
    }

    /// Top-N featured listings, by priority. Cache miss recomputes from PG
    /// and repopulates both tiers.
    pub async fn featured_top(&self, n: i64) -> anyhow::Result<Vec<ListingEntry>> {
        let key = featured_top_key(n);
        if let Some(cached) = self.cache.get::<Vec<ListingEntry>>(&key).await {
            return Ok(cached);
        }

        let fresh = self.store.list_featured_top(n).await?;
        if let Err(e) = self.cache.set(&key, &fresh, self.ttl_secs).await {
            tracing::warn!(key = %key, error = %e, "failed to populate listing cache");
        }
        Ok(fresh)
    }

    pub async fn active_ads(&self) -> anyhow::Result<Vec<ListingEntry>> {
        let key = active_ads_key();
        if let Some(cached) = self.cache.get::<Vec<ListingEntry>>(&key).await {
            return Ok(cached);
        }

        let fresh = self.store.list_active_ads().await?;
        if let Err(e) = self.cache.set(&key, &fresh, self.ttl_secs).await {
            tracing::warn!(key = %key, error = %e, "failed to populate listing cache");
        }
        Ok(fresh)
    }

    /// Invalidate every view a transition on `kind` may have staled.
    pub async fn invalidate_kind(&self, kind: RequestKind) {
        let keys = keys_for_kind(kind);
        if keys.is_empty() {
            return;
        }
        self.cache.invalidate(&keys).await;
    }
}

// ── Tests ───────────────────────────────────────────────────────
