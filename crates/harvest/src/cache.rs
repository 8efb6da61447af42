//! Result caching keyed by request fingerprint.
//!
//! ## Eviction
//!
//! Entries are never served past their TTL: an expired read is a miss and
//! removes the entry. When the cache is at `max_entries`, expired entries are
//! evicted first, otherwise the oldest one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::fingerprint::Fingerprint;
use crate::types::Extraction;

/// Default maximum number of cached results.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// Cache entry with metadata.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: Arc<Extraction>,
    /// When the entry was cached.
    cached_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }
}

/// In-memory TTL cache of successful extractions.
///
/// Backed by a sharded map, so concurrent reads never block each other.
pub struct ResultCache {
    entries: DashMap<Fingerprint, CacheEntry>,
    default_ttl: Duration,
    max_entries: usize,
}

impl ResultCache {
    pub fn new(default_ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Fresh value for `key`; an expired entry is evicted and reported as a miss.
    pub fn get(&self, key: &Fingerprint) -> Option<Arc<Extraction>> {
        let (value, expired) = {
            let entry = self.entries.get(key)?;
            (Arc::clone(&entry.value), entry.is_expired())
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired());
            tracing::debug!(fingerprint = %key, "cache entry expired");
            return None;
        }
        Some(value)
    }

    /// Store `value`, overwriting any previous entry for `key`.
    pub fn put(&self, key: Fingerprint, value: Extraction, ttl: Duration) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.evict();
        }
        self.entries.insert(
            key,
            CacheEntry {
                value: Arc::new(value),
                cached_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Store `value` with the default TTL.
    pub fn put_default(&self, key: Fingerprint, value: Extraction) {
        self.put(key, value, self.default_ttl);
    }

    /// Remove every entry, returning how many were held.
    pub fn clear(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        count
    }

    /// Number of cached results (including expired).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all expired entries.
    pub fn cleanup_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before.saturating_sub(self.entries.len())
    }

    fn evict(&self) {
        if self.cleanup_expired() > 0 {
            return;
        }

        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().cached_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            tracing::info!(fingerprint = %key, "evicting oldest cache entry");
            self.entries.remove(&key);
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(900), DEFAULT_MAX_ENTRIES)
    }
}
