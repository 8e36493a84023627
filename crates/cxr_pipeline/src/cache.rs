//! Bounded result cache with strict FIFO eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

/// Default number of retained results.
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

struct Entries<V> {
    values: HashMap<Fingerprint, Arc<V>>,
    order: VecDeque<Fingerprint>,
}

/// Fingerprint-keyed cache holding at most `capacity` results.
///
/// Eviction is strict insertion order: a hit never refreshes an entry, and the
/// oldest entry leaves in the same critical section that inserts the new one.
/// Putting a key that is already present keeps the stored value and its
/// position.
pub struct ResultCache<V> {
    entries: Mutex<Entries<V>>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V> ResultCache<V> {
    /// Create a cache. A capacity of zero stores nothing.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries {
                values: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a result.
    pub fn get(&self, key: &Fingerprint) -> Option<Arc<V>> {
        let found = self.entries.lock().values.get(key).cloned();
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Insert a result and return the value now stored under `key`.
    ///
    /// If `key` is already present the existing value is returned and `value`
    /// is dropped.
    pub fn put(&self, key: Fingerprint, value: Arc<V>) -> Arc<V> {
        if self.capacity == 0 {
            return value;
        }

        let mut entries = self.entries.lock();
        if let Some(existing) = entries.values.get(&key) {
            return Arc::clone(existing);
        }

        while entries.order.len() >= self.capacity {
            match entries.order.pop_front() {
                Some(oldest) => {
                    entries.values.remove(&oldest);
                }
                None => break,
            }
        }

        entries.order.push_back(key.clone());
        entries.values.insert(key, Arc::clone(&value));
        value
    }

    /// Whether `key` is cached. Does not touch the hit/miss counters.
    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.entries.lock().values.contains_key(key)
    }

    /// Number of cached results.
    pub fn len(&self) -> usize {
        self.entries.lock().order.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of cached results.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Cached keys, oldest first.
    pub fn keys(&self) -> Vec<Fingerprint> {
        self.entries.lock().order.iter().cloned().collect()
    }

    /// Drop every cached result. Counters are kept.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.values.clear();
        entries.order.clear();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<V> Default for ResultCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl<V> std::fmt::Debug for ResultCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("stats", &self.stats())
            .finish()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries currently stored.
    pub entries: usize,
    /// Maximum entries.
    pub capacity: usize,
    /// Lookups that found a result.
    pub hits: u64,
    /// Lookups that did not.
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups that hit, or 0 with no lookups.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> Fingerprint {
        Fingerprint::of(&[n])
    }

    #[test]
    fn test_get_after_put() {
        let cache = ResultCache::new(2);
        assert!(cache.get(&key(1)).is_none());

        cache.put(key(1), Arc::new("a"));
        assert_eq!(cache.get(&key(1)).as_deref(), Some(&"a"));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
        assert!((stats.hit_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_fifo_eviction_ignores_hits() {
        let cache = ResultCache::new(3);
        for n in 0..3 {
            cache.put(key(n), Arc::new(n));
        }
        // a hit on the oldest entry must not save it
        assert!(cache.get(&key(0)).is_some());

        cache.put(key(3), Arc::new(3));
        assert_eq!(cache.len(), 3);
        assert!(!cache.contains(&key(0)));
        assert_eq!(cache.keys(), vec![key(1), key(2), key(3)]);
    }

    #[test]
    fn test_reput_keeps_value_and_position() {
        let cache = ResultCache::new(2);
        cache.put(key(1), Arc::new("first"));
        cache.put(key(2), Arc::new("second"));

        let stored = cache.put(key(1), Arc::new("replacement"));
        assert_eq!(*stored, "first");
        assert_eq!(cache.keys(), vec![key(1), key(2)]);

        cache.put(key(3), Arc::new("third"));
        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(2)));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let cache = ResultCache::new(0);
        let value = cache.put(key(1), Arc::new(7));
        assert_eq!(*value, 7);
        assert!(cache.is_empty());
        assert!(cache.get(&key(1)).is_none());
    }

    #[test]
    fn test_bound_holds_under_contention() {
        let cache = ResultCache::new(4);
        std::thread::scope(|s| {
            for t in 0..8u8 {
                let cache = &cache;
                s.spawn(move || {
                    for n in 0..32u8 {
                        cache.put(key(t.wrapping_mul(32).wrapping_add(n)), Arc::new(n));
                        assert!(cache.len() <= 4);
                    }
                });
            }
        });
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.keys().len(), 4);
    }

    #[test]
    fn test_clear_keeps_counters() {
        let cache = ResultCache::new(2);
        cache.put(key(1), Arc::new(1));
        cache.get(&key(1));
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.capacity(), 2);
    }
}
