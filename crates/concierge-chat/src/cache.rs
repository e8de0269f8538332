//! Time-boxed caches.
//!
//! [`CacheEntry`] holds one payload plus the instant it was populated. It is
//! valid until its TTL elapses and then stale as a whole; there is no partial
//! invalidation. [`TtlCache`] wraps an entry holding a record collection and is
//! used to mirror the slow-changing backing-store collections.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use concierge_core::Clock;
use serde::Serialize;
use tracing::{debug, warn};

// =============================================================================
// CacheEntry
// =============================================================================

/// A payload with its population timestamp and a fixed TTL.
#[derive(Debug)]
pub struct CacheEntry<T> {
    payload: Option<Arc<T>>,
    populated_at: Option<DateTime<Utc>>,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    /// An empty entry that is never valid until populated.
    pub fn empty(ttl: Duration) -> Self {
        Self {
            payload: None,
            populated_at: None,
            ttl,
        }
    }

    /// Replace the payload and restart the TTL window at `now`.
    pub fn populate(&mut self, payload: T, now: DateTime<Utc>) -> Arc<T> {
        let payload = Arc::new(payload);
        self.payload = Some(Arc::clone(&payload));
        self.populated_at = Some(now);
        payload
    }

    /// `true` iff the entry was populated and less than `ttl` has elapsed.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        match self.populated_at {
            Some(ts) => now - ts < self.ttl,
            None => false,
        }
    }

    /// The payload if the entry is valid at `now`.
    pub fn get(&self, now: DateTime<Utc>) -> Option<Arc<T>> {
        if self.is_valid(now) {
            self.payload.clone()
        } else {
            None
        }
    }

    /// The payload regardless of validity.
    pub fn peek(&self) -> Option<&Arc<T>> {
        self.payload.as_ref()
    }

    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.populated_at.map(|ts| now - ts)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn clear(&mut self) {
        self.payload = None;
        self.populated_at = None;
    }
}

// =============================================================================
// TtlCache
// =============================================================================

/// Diagnostic snapshot of a [`TtlCache`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStatus {
    pub name: String,
    pub has_data: bool,
    pub is_valid: bool,
    pub item_count: usize,
    /// Seconds since the last population, if ever populated.
    pub age_seconds: Option<i64>,
    pub ttl_seconds: i64,
}

/// A cached record collection with a fixed TTL.
///
/// A miss is an expected condition signalled by `None`, never an error; the
/// caller repopulates from the backing store.
pub struct TtlCache<T> {
    name: String,
    entry: RwLock<CacheEntry<Vec<T>>>,
    clock: Arc<dyn Clock>,
}

impl<T> TtlCache<T> {
    pub fn new(name: impl Into<String>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            entry: RwLock::new(CacheEntry::empty(ttl)),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the cached collection and restart the TTL window.
    ///
    /// An empty collection is ignored and leaves the previous contents in
    /// place. Returns whether the cache was updated.
    pub fn update(&self, records: Vec<T>) -> bool {
        if records.is_empty() {
            warn!(cache = %self.name, "Ignoring cache update with no records");
            return false;
        }

        let count = records.len();
        let now = self.clock.now();
        let mut entry = self.entry.write().unwrap_or_else(|e| e.into_inner());
        entry.populate(records, now);
        debug!(cache = %self.name, count, "Cache populated");
        true
    }

    /// The cached collection if still valid, otherwise `None`.
    ///
    /// Repeated calls within the TTL window return the same shared payload.
    pub fn get(&self) -> Option<Arc<Vec<T>>> {
        let now = self.clock.now();
        let entry = self.entry.read().unwrap_or_else(|e| e.into_inner());
        let hit = entry.get(now);
        if hit.is_some() {
            debug!(cache = %self.name, "Cache hit");
        } else {
            debug!(cache = %self.name, "Cache miss");
        }
        hit
    }

    pub fn is_valid(&self) -> bool {
        let now = self.clock.now();
        self.entry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_valid(now)
    }

    /// Drop the cached collection so the next `get` misses.
    pub fn clear(&self) {
        self.entry.write().unwrap_or_else(|e| e.into_inner()).clear();
        debug!(cache = %self.name, "Cache cleared");
    }

    pub fn status(&self) -> CacheStatus {
        let now = self.clock.now();
        let entry = self.entry.read().unwrap_or_else(|e| e.into_inner());
        CacheStatus {
            name: self.name.clone(),
            has_data: entry.peek().is_some(),
            is_valid: entry.is_valid(now),
            item_count: entry.peek().map_or(0, |records| records.len()),
            age_seconds: entry.age(now).map(|age| age.num_seconds()),
            ttl_seconds: entry.ttl().num_seconds(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
