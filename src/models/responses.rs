//! Response DTOs for the diagnostics handler
//!
//! Defines the JSON bodies written back to inbound connections.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::pool::PoolStats;

/// Per-cache section of [`StatusResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    /// Entry cap
    pub max_entries: usize,
    /// Idle budget in seconds, null when unlimited
    pub max_idle_secs: Option<u64>,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    #[serde(flatten)]
    pub stats: CacheStats,
}

impl CacheSummary {
    pub fn new(max_entries: usize, max_idle_secs: Option<u64>, stats: CacheStats) -> Self {
        Self {
            max_entries,
            max_idle_secs,
            hit_rate: stats.hit_rate(),
            stats,
        }
    }
}

/// Snapshot of the shared runtime state.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    /// Always "ok"; present so probes can match on it
    pub status: String,
    /// Snapshot date currently being served
    pub reference_date: String,
    /// Days a capture may drift from the reference date
    pub date_tolerance: u32,
    /// Number of whitelisted domains
    pub whitelist_domains: usize,
    pub date_cache: CacheSummary,
    pub availability_cache: CacheSummary,
    pub pool: PoolStats,
    /// Crate version
    pub version: String,
    /// Time of the snapshot, RFC 3339
    pub timestamp: String,
}

/// Body for malformed inbound requests.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
