//! Thread-safe expiring LRU cache
//!
//! One mutex per cache instance guards the whole ordered store. Every public
//! operation is a single self-contained critical section; evicted values are
//! dropped only after the lock is released.

use std::borrow::Borrow;
use std::fmt::Debug;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::cache::{CacheStats, CacheStore};
use crate::error::Result;

// == Expiring LRU Cache ==
/// A concurrent key/value cache with a size cap and an idle-age budget.
///
/// Only [`get`](Self::get) refreshes an entry. Age is enforced lazily: a stale
/// entry is served until the next eviction pass, which every
/// [`set`](Self::set) runs.
#[derive(Debug)]
pub struct ExpiringLruCache<K, V> {
    inner: Mutex<CacheStore<K, V>>,
}

impl<K, V> ExpiringLruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    // == Constructor ==
    /// Creates a cache holding at most `max_entries` entries, each allowed to
    /// sit unused for `max_idle` (`None` or zero = forever).
    ///
    /// Fails with [`crate::error::CacheError::InvalidConfig`] when `max_entries` is zero.
    pub fn new(max_entries: usize, max_idle: Option<Duration>) -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(CacheStore::new(max_entries, max_idle)?),
        })
    }

    // == Max Entries ==
    pub fn max_entries(&self) -> usize {
        self.inner.lock().max_entries()
    }

    // == Max Idle ==
    pub fn max_idle(&self) -> Option<Duration> {
        self.inner.lock().max_idle()
    }

    // == Get ==
    /// Looks up `key`, refreshing its timestamp and recency on a hit.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().get(key)
    }

    // == Get Or ==
    /// Looks up `key`, falling back to `default` on a miss.
    pub fn get_or<Q>(&self, key: &Q, default: V) -> V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).unwrap_or(default)
    }

    // == Set ==
    /// Inserts or overwrites `key`, then runs an eviction pass.
    pub fn set(&self, key: K, value: V) {
        let evicted = self.inner.lock().set(key, value);
        drop(evicted);
    }

    // == Time To Live ==
    /// Remaining lifetime of `key` in seconds; `Ok(None)` when unlimited.
    ///
    /// Does not refresh the entry. Negative for an expired entry that has not
    /// been swept yet.
    pub fn ttl<Q>(&self, key: &Q) -> Result<Option<f64>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + Debug + ?Sized,
    {
        self.inner.lock().ttl(key)
    }

    // == Contains ==
    /// Presence check that does not count as use.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.lock().contains(key)
    }

    // == Purge ==
    /// Runs an eviction pass without inserting anything.
    ///
    /// Returns the number of entries removed.
    pub fn purge(&self) -> usize {
        let evicted = self.inner.lock().purge();
        evicted.len()
    }

    // == Clear ==
    /// Empties the cache in one critical section.
    pub fn clear(&self) {
        let old = self.inner.lock().clear();
        drop(old);
    }

    // == Items ==
    /// Snapshot of `(key, value)` pairs, least recently used first.
    ///
    /// Neither refreshes nor evicts; meant for diagnostics.
    pub fn items(&self) -> impl Iterator<Item = (K, V)> {
        let snapshot = self.inner.lock().snapshot();
        snapshot.into_iter()
    }

    // == Keys ==
    /// Snapshot of keys, least recently used first.
    pub fn keys(&self) -> impl Iterator<Item = K> {
        self.items().map(|(k, _)| k)
    }

    // == Values ==
    /// Snapshot of values, least recently used first.
    pub fn values(&self) -> impl Iterator<Item = V> {
        self.items().map(|(_, v)| v)
    }

    // == Stats ==
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats()
    }

    // == Length ==
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    // == Get Or Insert ==
    /// Atomic lookup-or-insert; returns the value and anything the insertion evicted.
    ///
    /// `make` runs inside the critical section and must not block or do I/O.
    pub(crate) fn get_or_insert_with<F>(&self, key: K, make: F) -> (V, Vec<(K, V)>)
    where
        F: FnOnce() -> V,
    {
        self.inner.lock().get_or_insert_with(key, make)
    }

    // == Lock ==
    /// Raw guard, used to hold several caches' locks at once.
    pub(crate) fn lock(&self) -> MutexGuard<'_, CacheStore<K, V>> {
        self.inner.lock()
    }
}
