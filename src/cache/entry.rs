//! Cache Entry Module
//!
//! Defines the value slot stored by the cache together with its last-access time.

use std::time::{Duration, Instant};

// == Cache Entry ==
/// A stored value and the moment it was last used.
///
/// The timestamp is rewritten on every write and on every `get`; it is the
/// only input to age-based eviction.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The stored value
    pub value: V,
    /// Last time this entry was written or read through `get`
    pub last_access: Instant,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry stamped with the current time.
    pub fn new(value: V) -> Self {
        Self {
            value,
            last_access: Instant::now(),
        }
    }

    // == Touch ==
    /// Marks the entry as just used.
    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    // == Idle Age ==
    /// Time elapsed since the entry was last used.
    pub fn idle(&self) -> Duration {
        self.last_access.elapsed()
    }

    // == Is Expired ==
    /// Checks whether the entry's idle age has reached `max_idle`.
    ///
    /// Boundary condition: an entry whose idle age equals `max_idle` exactly
    /// is expired.
    pub fn is_expired(&self, max_idle: Duration) -> bool {
        self.idle() >= max_idle
    }

    // == Time To Live ==
    /// Remaining lifetime in seconds relative to `max_idle`.
    ///
    /// Negative once the entry has outlived `max_idle` but has not been
    /// swept yet.
    pub fn ttl_secs(&self, max_idle: Duration) -> f64 {
        max_idle.as_secs_f64() - self.idle().as_secs_f64()
    }
}
