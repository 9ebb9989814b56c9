//! Cache Module
//!
//! In-memory caches with combined LRU and idle-age eviction. Contents never
//! outlive the process.

mod entry;
mod expiring;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use expiring::ExpiringLruCache;
pub use lru::LruTracker;
pub use stats::CacheStats;
pub use store::CacheStore;

/// Request URL → resolved snapshot date.
pub type DateCache = ExpiringLruCache<String, String>;

/// `(url, date)` → availability lookup result.
pub type AvailabilityCache = ExpiringLruCache<(String, String), SnapshotInfo>;

// == Public Constants ==
/// Default entry cap of both proxy caches
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Default idle budget of both proxy caches (24 hours)
pub const DEFAULT_MAX_IDLE_SECS: u64 = 86_400;

/// Outcome of an archive availability lookup, as cached per `(url, date)`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct SnapshotInfo {
    /// Whether the archive holds a capture close enough to the requested date
    pub available: bool,
    /// Archive URL of the closest capture
    pub url: Option<String>,
    /// 14-digit timestamp of the closest capture
    pub timestamp: Option<String>,
}

impl SnapshotInfo {
    pub fn available(url: impl Into<String>, timestamp: impl Into<String>) -> Self {
        Self {
            available: true,
            url: Some(url.into()),
            timestamp: Some(timestamp.into()),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            url: None,
            timestamp: None,
        }
    }
}
