//! [`CorrelationCache`]: time-bounded map from request id to request start time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// A request waiting for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    /// Timestamp carried by the request record, if it had a parseable one.
    pub start_time: Option<DateTime<Utc>>,
    inserted_at: Instant,
}

impl PendingRequest {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at) >= ttl
    }
}

/// Shared, concurrency-safe cache of pending requests.
///
/// Backed by a [`DashMap`] so the pipeline loop and the background eviction
/// task can mutate it concurrently. Removal is atomic per key: when
/// [`take_if_present`](Self::take_if_present) and an eviction sweep race on the
/// same entry, exactly one of them removes it.
#[derive(Clone, Debug)]
pub struct CorrelationCache {
    entries: Arc<DashMap<String, PendingRequest>>,
    ttl: Duration,
}

impl CorrelationCache {
    /// Create an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of entries currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Return `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record a pending request, replacing any entry with the same id.
    pub fn put(&self, request_id: impl Into<String>, start_time: Option<DateTime<Utc>>) {
        self.entries.insert(
            request_id.into(),
            PendingRequest {
                start_time,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Remove and return the pending request for `request_id`.
    ///
    /// Returns `None` if no entry exists or the entry outlived the TTL. An
    /// expired entry is removed either way, so a late response can never match
    /// a stale start time even if the sweep has not run yet.
    pub fn take_if_present(&self, request_id: &str) -> Option<PendingRequest> {
        let (_, pending) = self.entries.remove(request_id)?;
        if pending.is_expired(self.ttl, Instant::now()) {
            return None;
        }
        Some(pending)
    }

    /// Drop every entry older than the TTL. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut evicted = 0;
        self.entries.retain(|_, pending| {
            let keep = !pending.is_expired(ttl, now);
            if !keep {
                evicted += 1;
            }
            keep
        });
        evicted
    }
}
