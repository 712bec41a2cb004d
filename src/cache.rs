// TTL cache tables used by the contract registry.
// Entries are replaced wholesale, never mutated in place.

use dashmap::DashMap;
use log::debug;
use std::time::{Duration, Instant};

use crate::metrics;

/// Default lifetime of a cached address, ABI or contract handle.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub created_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            created_at: Instant::now(),
        }
    }

    /// An entry is valid while `now - created_at <= ttl`.
    pub fn is_fresh(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) <= ttl
    }
}

/// A single cache table keyed by contract name.
///
/// Backed by a sharded `DashMap`, so lookups for different names only contend
/// when they land in the same shard and never block on each other's I/O.
pub struct TtlCache<T: Clone> {
    name: &'static str,
    entries: DashMap<String, CacheEntry<T>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns the cached value if it is still within its TTL.
    /// Expired entries are removed on the way out.
    pub fn get(&self, key: &str) -> Option<T> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if entry.is_fresh(self.ttl, now) => {
                metrics::increment_cache_hit(self.name);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            // The guard above is dropped; re-check so a concurrent refresh is not evicted.
            self.entries
                .remove_if(key, |_, entry| !entry.is_fresh(self.ttl, Instant::now()));
            debug!("{} cache entry for {} expired", self.name, key);
        }
        metrics::increment_cache_miss(self.name);
        None
    }

    pub fn insert(&self, key: &str, value: T) {
        self.entries.insert(key.to_string(), CacheEntry::new(value));
        metrics::set_cache_size(self.name, self.entries.len() as f64);
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.entries.remove(key).map(|(_, entry)| entry.value)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
