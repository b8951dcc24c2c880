use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::Clock;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    inserted_at_ms: i64,
}

// ---------------------------------------------------------------------------
// TtlCache
// ---------------------------------------------------------------------------

/// Bounded, per-process cache with a fixed TTL.
///
/// Entries older than `ttl_ms` are never returned. When the cache is full an
/// insert first drops every expired entry, then the oldest surviving one.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    ttl_ms: i64,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(clock: Arc<dyn Clock>, ttl_ms: i64, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl_ms,
            capacity: capacity.max(1),
            clock,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now_ms();
        if let Some(entry) = self.entries.get(key) {
            if self.is_fresh(&entry, now) {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }
        // read guard is released here; dropping under it would deadlock the shard
        self.entries.remove_if(key, |_, e| !self.is_fresh(e, now));
        None
    }

    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now_ms();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.purge_expired();
            if self.entries.len() >= self.capacity {
                self.evict_oldest();
            }
        }
        self.entries.insert(key, CacheEntry { value, inserted_at_ms: now });
    }

    /// Count of stored entries, expired ones included until the next purge.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.inserted_at_ms < self.ttl_ms);
        before.saturating_sub(self.entries.len())
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().inserted_at_ms)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    fn is_fresh(&self, entry: &CacheEntry<V>, now: i64) -> bool {
        now - entry.inserted_at_ms < self.ttl_ms
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
