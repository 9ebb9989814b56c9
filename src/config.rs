//! Configuration Module
//!
//! Builds the one immutable [`Config`] value handed to the shared state and the
//! server at startup. Sources, lowest precedence first: built-in defaults, an
//! optional JSON file, then environment variables.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Datelike, Local, NaiveDate};
use serde::Deserialize;
use tracing::info;

use crate::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_MAX_IDLE_SECS};
use crate::error::ConfigError;
use crate::pool::PoolConfig;

/// Earliest year the archive has captures for.
const FIRST_ARCHIVE_YEAR: i32 = 1996;

/// Longest accepted connect or read timeout (one day).
const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Proxy configuration parameters.
///
/// JSON keys keep the legacy upper-case spelling (`LISTEN_PORT`, `DATE`, ...);
/// unknown keys are ignored so older config files still load.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inbound proxy port
    #[serde(rename = "LISTEN_PORT")]
    pub listen_port: u16,
    /// Reference snapshot date: YYYY, YYYYMM or YYYYMMDD
    #[serde(rename = "DATE")]
    pub date: String,
    /// Days a capture may differ from `date` and still be served
    #[serde(rename = "DATE_TOLERANCE")]
    pub date_tolerance: u32,
    /// Only log warnings and errors
    #[serde(rename = "SILENT")]
    pub silent: bool,
    /// Newline-delimited domain whitelist
    #[serde(rename = "WHITELIST")]
    pub whitelist_path: PathBuf,
    /// Optional cap on concurrently served inbound connections
    #[serde(rename = "MAX_INBOUND")]
    pub max_inbound: Option<usize>,
    #[serde(rename = "POOL")]
    pub pool: PoolSettings,
    #[serde(rename = "CACHE")]
    pub cache: CacheSettings,
}

/// Outbound pool section of the config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub max_per_host: usize,
    pub max_hosts: usize,
    pub block: bool,
    pub connect_timeout_secs: f64,
    pub read_timeout_secs: f64,
    pub verify_tls: bool,
}

/// Cache section of the config file. A TTL of zero means unlimited.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub date_max_entries: usize,
    pub date_ttl_secs: u64,
    pub availability_max_entries: usize,
    pub availability_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 8888,
            date: "20011025".to_string(),
            date_tolerance: 365,
            silent: false,
            whitelist_path: PathBuf::from("whitelist.txt"),
            max_inbound: None,
            pool: PoolSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            max_per_host: pool.max_per_host,
            max_hosts: pool.max_hosts,
            block: pool.block,
            connect_timeout_secs: pool.connect_timeout.as_secs_f64(),
            read_timeout_secs: pool.read_timeout.as_secs_f64(),
            verify_tls: pool.verify_tls,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            date_max_entries: DEFAULT_MAX_ENTRIES,
            date_ttl_secs: DEFAULT_MAX_IDLE_SECS,
            availability_max_entries: DEFAULT_MAX_ENTRIES,
            availability_ttl_secs: DEFAULT_MAX_IDLE_SECS,
        }
    }
}

impl PoolSettings {
    /// Converts to the pool's own config type.
    ///
    /// Fails on timeouts that are not a representable, non-negative duration.
    pub fn to_pool_config(&self) -> Result<PoolConfig, ConfigError> {
        Ok(PoolConfig {
            max_per_host: self.max_per_host,
            max_hosts: self.max_hosts,
            block: self.block,
            connect_timeout: seconds("connect_timeout_secs", self.connect_timeout_secs)?,
            read_timeout: seconds("read_timeout_secs", self.read_timeout_secs)?,
            verify_tls: self.verify_tls,
        })
    }
}

fn seconds(name: &str, secs: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| ConfigError::Invalid(format!("Invalid {}: {}", name, secs)))
}

impl CacheSettings {
    pub fn date_ttl(&self) -> Option<Duration> {
        ttl(self.date_ttl_secs)
    }

    pub fn availability_ttl(&self) -> Option<Duration> {
        ttl(self.availability_ttl_secs)
    }
}

fn ttl(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl Config {
    /// Reads `path` if it exists, applies environment overrides, validates.
    ///
    /// A missing file is not an error; a malformed one is.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let text = fs::read_to_string(path)?;
            info!("Loading configuration from {}", path.display());
            Self::from_json(&text)?
        } else {
            info!("No config file at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses a JSON config document, filling gaps with defaults.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Applies overrides from `lookup`; unparsable values are ignored.
    ///
    /// # Environment Variables
    /// - `WAYBACK_LISTEN_PORT` - Inbound port (default: 8888)
    /// - `WAYBACK_DATE` - Reference date (default: 20011025)
    /// - `WAYBACK_WHITELIST` - Whitelist path (default: whitelist.txt)
    /// - `WAYBACK_SILENT` - `true`/`1` to only log warnings
    /// - `WAYBACK_MAX_INBOUND` - Inbound connection cap (default: unbounded)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("WAYBACK_LISTEN_PORT").and_then(|v| v.parse().ok()) {
            self.listen_port = port;
        }
        if let Some(date) = lookup("WAYBACK_DATE") {
            self.date = date;
        }
        if let Some(path) = lookup("WAYBACK_WHITELIST") {
            self.whitelist_path = PathBuf::from(path);
        }
        if let Some(silent) = lookup("WAYBACK_SILENT") {
            self.silent = matches!(silent.as_str(), "1" | "true" | "yes");
        }
        if let Some(cap) = lookup("WAYBACK_MAX_INBOUND").and_then(|v| v.parse().ok()) {
            self.max_inbound = Some(cap).filter(|&c| c > 0);
        }
    }

    /// Checks every value against its allowed range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen_port < 1024 {
            return Err(ConfigError::Invalid(format!(
                "Invalid port: {}. Must be between 1024-65535",
                self.listen_port
            )));
        }
        validate_date(&self.date)?;

        if self.pool.max_per_host == 0 || self.pool.max_hosts == 0 {
            return Err(ConfigError::Invalid(
                "Pool sizes must be greater than zero".to_string(),
            ));
        }
        for (name, secs) in [
            ("connect_timeout_secs", self.pool.connect_timeout_secs),
            ("read_timeout_secs", self.pool.read_timeout_secs),
        ] {
            if !(secs > 0.0 && secs <= MAX_TIMEOUT_SECS) {
                return Err(ConfigError::Invalid(format!(
                    "Invalid {}: {}. Must be between 0 and {} seconds",
                    name, secs, MAX_TIMEOUT_SECS
                )));
            }
        }
        if self.cache.date_max_entries == 0 || self.cache.availability_max_entries == 0 {
            return Err(ConfigError::Invalid(
                "Cache capacities must be greater than zero".to_string(),
            ));
        }
        if self.max_inbound == Some(0) {
            return Err(ConfigError::Invalid(
                "MAX_INBOUND must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Accepts `YYYY`, `YYYYMM` or `YYYYMMDD` between 1996 and the current year.
pub fn validate_date(date: &str) -> Result<(), ConfigError> {
    let invalid = || {
        ConfigError::Invalid(format!(
            "Invalid date format: {}. Must be YYYY, YYYYMM, or YYYYMMDD",
            date
        ))
    };

    if !date.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let year: i32 = date.get(..4).and_then(|y| y.parse().ok()).ok_or_else(invalid)?;
    if !(FIRST_ARCHIVE_YEAR..=Local::now().year()).contains(&year) {
        return Err(invalid());
    }

    match date.len() {
        4 => Ok(()),
        6 => {
            let month: u32 = date[4..6].parse().map_err(|_| invalid())?;
            if (1..=12).contains(&month) {
                Ok(())
            } else {
                Err(invalid())
            }
        }
        8 => NaiveDate::parse_from_str(date, "%Y%m%d")
            .map(|_| ())
            .map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}
