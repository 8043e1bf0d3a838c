//! Background job: reclaim dead broadcast channels and expired local cache
//! entries.
//!
//! Subscriber churn leaves senders with no receivers in the hub registry, and
//! the local cache tier evicts lazily on read. Both are bounded by this sweep.

use std::time::Duration;

use tokio::time;

use crate::broadcast::Hub;
use crate::cache::TieredCache;

const SWEEP_INTERVAL_SECS: u64 = 60;

/// Spawn the sweeper. Call this once at startup.
pub fn spawn(hub: Hub, cache: TieredCache) {
    tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let channels = hub.prune();
            let entries = cache.evict_expired();
            if channels > 0 || entries > 0 {
                tracing::debug!(channels, entries, "maintenance sweep reclaimed resources");
            }
        }
    });
}
