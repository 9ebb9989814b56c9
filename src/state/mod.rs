//! Shared Runtime State
//!
//! The single value every worker thread borrows: the outbound pool, the two
//! proxy caches, the whitelist and the reference date.

mod whitelist;

pub use whitelist::Whitelist;

use std::path::Path;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::cache::{AvailabilityCache, DateCache, ExpiringLruCache};
use crate::config::{validate_date, Config};
use crate::error::ConfigError;
use crate::models::{CacheSummary, StatusResponse};
use crate::pool::{ConnectionPool, Connector, TcpConnector};

/// Process-wide state shared by all workers.
///
/// Built once at startup, then shared behind an `Arc`. The caches and the
/// pool synchronise internally; the whitelist is read-only after
/// [`load_whitelist`](Self::load_whitelist).
pub struct SharedState<C: Connector = TcpConnector> {
    pool: ConnectionPool<C>,
    date_cache: DateCache,
    availability_cache: AvailabilityCache,
    whitelist: Whitelist,
    reference_date: RwLock<String>,
    date_tolerance: u32,
}

impl SharedState<TcpConnector> {
    /// Builds the state described by `config` with a TCP connection pool.
    ///
    /// The config is validated first. The whitelist starts empty; call
    /// [`load_whitelist`](Self::load_whitelist).
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool = ConnectionPool::tcp(config.pool.to_pool_config()?)?;
        Self::with_pool(config, pool)
    }
}

impl<C: Connector> SharedState<C> {
    /// Builds the state described by `config` around an existing pool.
    pub fn with_pool(config: &Config, pool: ConnectionPool<C>) -> Result<Self, ConfigError> {
        validate_date(&config.date)?;
        let date_cache = ExpiringLruCache::new(config.cache.date_max_entries, config.cache.date_ttl())
            .map_err(|e| ConfigError::Invalid(format!("date cache: {}", e)))?;
        let availability_cache = ExpiringLruCache::new(
            config.cache.availability_max_entries,
            config.cache.availability_ttl(),
        )
        .map_err(|e| ConfigError::Invalid(format!("availability cache: {}", e)))?;

        info!(
            "Shared state initialized: date={}, date_cache={}/{:?}, availability_cache={}/{:?}",
            config.date,
            config.cache.date_max_entries,
            config.cache.date_ttl(),
            config.cache.availability_max_entries,
            config.cache.availability_ttl()
        );

        Ok(Self {
            pool,
            date_cache,
            availability_cache,
            whitelist: Whitelist::default(),
            reference_date: RwLock::new(config.date.clone()),
            date_tolerance: config.date_tolerance,
        })
    }

    /// Replaces the whitelist with the contents of `path`.
    ///
    /// Missing or unreadable files leave an empty whitelist. Takes `&mut self`
    /// so it can only run before the state is shared.
    pub fn load_whitelist(&mut self, path: impl AsRef<Path>) {
        self.whitelist = Whitelist::load(path);
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    /// Request URL → resolved snapshot date.
    pub fn date_cache(&self) -> &DateCache {
        &self.date_cache
    }

    /// `(url, date)` → availability result.
    pub fn availability_cache(&self) -> &AvailabilityCache {
        &self.availability_cache
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    pub fn date_tolerance(&self) -> u32 {
        self.date_tolerance
    }

    /// Snapshot date requests are currently resolved against.
    pub fn reference_date(&self) -> String {
        self.reference_date.read().clone()
    }

    /// Empties both caches in one step.
    ///
    /// Both cache locks are held together, so no reader can observe one cache
    /// cleared and the other not. Old contents are dropped after unlocking.
    pub fn clear_caches(&self) {
        let (old_dates, old_availability) = {
            let mut dates = self.date_cache.lock();
            let mut availability = self.availability_cache.lock();
            (dates.clear(), availability.clear())
        };
        info!(
            "Cleared caches ({} date entries, {} availability entries)",
            old_dates.len(),
            old_availability.len()
        );
    }

    /// Switches the reference date and clears both caches.
    ///
    /// The date lock is held across the clear, so a reader that sees the new
    /// date never sees a mapping cached under the old one.
    pub fn change_date(&self, date: &str) -> Result<(), ConfigError> {
        validate_date(date)?;
        let mut current = self.reference_date.write();
        if *current == date {
            debug!("Reference date unchanged ({})", date);
            return Ok(());
        }
        *current = date.to_string();
        self.clear_caches();
        drop(current);
        info!("Reference date changed to {}", date);
        Ok(())
    }

    /// Diagnostics snapshot; never refreshes cache entries.
    pub fn status(&self) -> StatusResponse {
        StatusResponse {
            status: "ok".to_string(),
            reference_date: self.reference_date(),
            date_tolerance: self.date_tolerance,
            whitelist_domains: self.whitelist.len(),
            date_cache: summarize(&self.date_cache),
            availability_cache: summarize(&self.availability_cache),
            pool: self.pool.stats(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn summarize<K, V>(cache: &ExpiringLruCache<K, V>) -> CacheSummary
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone,
{
    CacheSummary::new(
        cache.max_entries(),
        cache.max_idle().map(|d: Duration| d.as_secs()),
        cache.stats(),
    )
}
