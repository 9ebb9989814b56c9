//! Cache Store Module
//!
//! Single-threaded cache engine combining HashMap storage with LRU ordering
//! and idle-age expiration. [`super::ExpiringLruCache`] wraps it in a mutex.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::mem;
use std::time::Duration;

use crate::cache::{CacheEntry, CacheStats, LruTracker};
use crate::error::{CacheError, Result};

// == Cache Store ==
/// Ordered key/value storage with size and age based eviction.
///
/// Order invariant: `lru` lists every key of `entries` exactly once, least
/// recently used at the back. Because every use stamps `Instant::now()` and
/// moves the key to the front, ascending order of `last_access` matches
/// back-to-front order, which lets the age phase stop at the first fresh entry.
#[derive(Debug)]
pub struct CacheStore<K, V> {
    /// Key-value storage
    entries: HashMap<K, CacheEntry<V>>,
    /// LRU access tracker
    lru: LruTracker<K>,
    /// Performance statistics
    stats: CacheStats,
    /// Maximum number of entries allowed
    max_entries: usize,
    /// Maximum idle age, None = unlimited
    max_idle: Option<Duration>,
}

impl<K, V> CacheStore<K, V>
where
    K: Hash + Eq + Clone,
{
    // == Constructor ==
    /// Creates a new CacheStore.
    ///
    /// # Arguments
    /// * `max_entries` - Entry count cap; zero is rejected
    /// * `max_idle` - Allowed idleness; `None` or zero means unlimited
    pub fn new(max_entries: usize, max_idle: Option<Duration>) -> Result<Self> {
        if max_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "max_entries must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            stats: CacheStats::new(),
            max_entries,
            max_idle: max_idle.filter(|d| !d.is_zero()),
        })
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_idle(&self) -> Option<Duration> {
        self.max_idle
    }

    // == Set ==
    /// Inserts or overwrites `key` with the current timestamp, then runs an
    /// eviction pass.
    ///
    /// Returns the evicted entries so the caller can drop them outside any lock.
    pub fn set(&mut self, key: K, value: V) -> Vec<(K, V)> {
        self.entries.insert(key.clone(), CacheEntry::new(value));
        self.lru.touch(key);
        self.purge()
    }

    // == Get ==
    /// Returns the value for `key` and marks it as most recently used.
    ///
    /// Entries past their idle budget are still returned until the next
    /// eviction pass removes them.
    pub fn get<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.touch();
                let value = entry.value.clone();
                self.lru.promote(key);
                self.stats.record_hit();
                Some(value)
            }
            None => {
                self.stats.record_miss();
                None
            }
        }
    }

    // == Get Or Insert ==
    /// Returns the value for `key`, inserting `make()` first if absent.
    ///
    /// Either way the entry counts as used. An insertion triggers an eviction
    /// pass whose victims are returned alongside the value.
    pub fn get_or_insert_with<F>(&mut self, key: K, make: F) -> (V, Vec<(K, V)>)
    where
        F: FnOnce() -> V,
        V: Clone,
    {
        if let Some(value) = self.get(&key) {
            return (value, Vec::new());
        }
        let value = make();
        let evicted = self.set(key, value.clone());
        (value, evicted)
    }

    // == Time To Live ==
    /// Remaining lifetime of `key` in seconds without refreshing it.
    ///
    /// `Ok(None)` means unlimited. The value may be negative for an entry
    /// that has expired but not been swept yet.
    pub fn ttl<Q>(&self, key: &Q) -> Result<Option<f64>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| CacheError::NotFound(format!("{:?}", key)))?;
        Ok(self.max_idle.map(|max_idle| entry.ttl_secs(max_idle)))
    }

    // == Contains ==
    /// Checks presence without counting as use.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    // == Purge ==
    /// Eviction pass: size phase, then age phase.
    ///
    /// Returns the removed entries, least recently used first.
    pub fn purge(&mut self) -> Vec<(K, V)> {
        let mut evicted = Vec::new();

        while self.entries.len() > self.max_entries {
            match self.evict_oldest() {
                Some(pair) => evicted.push(pair),
                None => break,
            }
        }

        if let Some(max_idle) = self.max_idle {
            while let Some(oldest) = self.lru.peek_oldest() {
                let expired = self
                    .entries
                    .get(oldest)
                    .map_or(true, |entry| entry.is_expired(max_idle));
                if !expired {
                    break;
                }
                match self.evict_oldest() {
                    Some(pair) => evicted.push(pair),
                    None => break,
                }
            }
        }

        self.stats.set_total_entries(self.entries.len());
        evicted
    }

    fn evict_oldest(&mut self) -> Option<(K, V)> {
        let key = self.lru.evict_oldest()?;
        let entry = self.entries.remove(&key)?;
        self.stats.record_eviction();
        Some((key, entry.value))
    }

    // == Clear ==
    /// Empties the store, handing back the old contents to be dropped by the caller.
    pub fn clear(&mut self) -> HashMap<K, CacheEntry<V>> {
        self.lru.clear();
        self.stats.record_clear();
        self.stats.set_total_entries(0);
        mem::take(&mut self.entries)
    }

    // == Snapshot ==
    /// Copies current contents, least recently used first, without touching them.
    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        V: Clone,
    {
        self.lru
            .iter_oldest_first()
            .filter_map(|key| {
                self.entries
                    .get(key)
                    .map(|entry| (key.clone(), entry.value.clone()))
            })
            .collect()
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn store(max_entries: usize, max_idle_secs: u64) -> CacheStore<String, u32> {
        CacheStore::new(max_entries, Some(Duration::from_secs(max_idle_secs))).unwrap()
    }

    #[test]
    fn test_store_new() {
        let store = store(100, 300);
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.max_idle(), Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_store_rejects_zero_capacity() {
        let result: Result<CacheStore<String, u32>> = CacheStore::new(0, None);
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_store_zero_idle_means_unlimited() {
        let store: CacheStore<String, u32> =
            CacheStore::new(10, Some(Duration::ZERO)).unwrap();
        assert_eq!(store.max_idle(), None);
    }

    #[test]
    fn test_store_set_and_get() {
        let mut store = store(100, 300);

        store.set("key1".to_string(), 1);

        assert_eq!(store.get("key1"), Some(1));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_get_nonexistent() {
        let mut store = store(100, 300);
        assert_eq!(store.get("nonexistent"), None);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_store_overwrite() {
        let mut store = store(100, 300);

        store.set("key1".to_string(), 1);
        store.set("key1".to_string(), 2);

        assert_eq!(store.get("key1"), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_lru_eviction() {
        let mut store = store(2, 300);

        store.set("a".to_string(), 1);
        store.set("b".to_string(), 2);
        let evicted = store.set("c".to_string(), 3);

        assert_eq!(evicted, vec![("a".to_string(), 1)]);
        assert_eq!(store.get("a"), None);
        assert_eq!(store.get("b"), Some(2));
        assert_eq!(store.get("c"), Some(3));
    }

    #[test]
    fn test_store_lru_touch_on_get() {
        let mut store = store(3, 300);

        store.set("key1".to_string(), 1);
        store.set("key2".to_string(), 2);
        store.set("key3".to_string(), 3);

        store.get("key1");
        store.set("key4".to_string(), 4);

        assert!(store.contains("key1"));
        assert!(!store.contains("key2"));
    }

    #[test]
    fn test_store_age_eviction_on_set() {
        let mut store = store(100, 1);

        store.set("x".to_string(), 1);
        sleep(Duration::from_millis(1100));
        store.set("y".to_string(), 2);

        assert!(!store.contains("x"));
        assert!(store.contains("y"));
    }

    #[test]
    fn test_store_lazy_expiry_on_get() {
        let mut store = store(100, 1);

        store.set("x".to_string(), 1);
        sleep(Duration::from_millis(1100));

        // No eviction pass has run yet, so the stale entry is still served
        assert_eq!(store.get("x"), Some(1));

        // ...and the read refreshed it, so the next pass keeps it
        store.set("y".to_string(), 2);
        assert!(store.contains("x"));
    }

    #[test]
    fn test_store_age_phase_stops_at_fresh_entry() {
        let mut store = store(100, 1);

        store.set("old".to_string(), 1);
        store.set("refreshed".to_string(), 2);
        sleep(Duration::from_millis(600));
        store.get("refreshed");
        sleep(Duration::from_millis(500));
        store.set("new".to_string(), 3);

        assert!(!store.contains("old"));
        assert!(store.contains("refreshed"));
        assert!(store.contains("new"));
    }

    #[test]
    fn test_store_ttl() {
        let mut store = store(100, 10);
        store.set("key".to_string(), 1);

        let ttl = store.ttl("key").unwrap().unwrap();
        assert!(ttl <= 10.0 && ttl > 9.0);

        assert!(matches!(store.ttl("missing"), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_store_ttl_unlimited() {
        let mut store: CacheStore<String, u32> = CacheStore::new(10, None).unwrap();
        store.set("key".to_string(), 1);
        assert_eq!(store.ttl("key").unwrap(), None);
        assert!(store.ttl("missing").is_err());
    }

    #[test]
    fn test_store_snapshot_order_and_no_refresh() {
        let mut store = store(100, 300);
        store.set("a".to_string(), 1);
        store.set("b".to_string(), 2);
        store.get("a");

        let stats_before = store.stats();
        let items = store.snapshot();

        assert_eq!(items, vec![("b".to_string(), 2), ("a".to_string(), 1)]);
        assert_eq!(store.stats(), stats_before);
    }

    #[test]
    fn test_store_get_or_insert_with() {
        let mut store = store(1, 300);

        let (value, evicted) = store.get_or_insert_with("a".to_string(), || 1);
        assert_eq!(value, 1);
        assert!(evicted.is_empty());

        let (value, _) = store.get_or_insert_with("a".to_string(), || 99);
        assert_eq!(value, 1);

        let (value, evicted) = store.get_or_insert_with("b".to_string(), || 2);
        assert_eq!(value, 2);
        assert_eq!(evicted, vec![("a".to_string(), 1)]);
    }

    #[test]
    fn test_store_clear() {
        let mut store = store(100, 300);
        store.set("a".to_string(), 1);
        store.set("b".to_string(), 2);

        let old = store.clear();

        assert_eq!(old.len(), 2);
        assert!(store.is_empty());
        assert!(store.snapshot().is_empty());
        assert_eq!(store.stats().clears, 1);
    }

    #[test]
    fn test_store_stats() {
        let mut store = store(1, 300);

        store.set("key1".to_string(), 1);
        store.get("key1");
        store.get("nonexistent");
        store.set("key2".to_string(), 2);

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.total_entries, 1);
    }
}
