//! Request/response correlation with bounded lifetime.
//!
//! # Lifecycle of a request id
//!
//! ```text
//! absent ──put──▶ pending ──take (within TTL)──▶ completed (entry removed)
//!                    │
//!                    └──TTL elapses──▶ expired (entry removed)
//! ```
//!
//! A response whose id is `absent` or `expired` is a correlation miss.

pub mod cache;

pub use cache::CorrelationCache;

use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Spawn a background task that sweeps expired entries out of `cache` every
/// `interval` until `cancel` fires.
pub fn eviction_task(
    cache: CorrelationCache,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        // First tick fires immediately; the cache is empty at startup.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = cache.evict_expired();
                    if evicted > 0 {
                        debug!(evicted, remaining = cache.len(), "evicted expired pending requests");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}
