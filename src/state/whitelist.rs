//! Domain whitelist
//!
//! Loaded once at startup and never mutated, so lookups need no locking.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{info, warn};

/// Immutable set of allowed domains.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Whitelist {
    domains: HashSet<String>,
}

impl Whitelist {
    /// Builds a whitelist from newline-delimited text.
    ///
    /// Lines are trimmed and lower-cased; blank lines are skipped.
    pub fn parse(text: &str) -> Self {
        let domains = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_ascii_lowercase)
            .collect();
        Self { domains }
    }

    /// Reads the whitelist at `path`.
    ///
    /// A missing or unreadable file yields an empty whitelist; startup never
    /// fails because of it.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("No whitelist at {}, continuing with an empty one", path.display());
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(text) => {
                let whitelist = Self::parse(&text);
                info!(
                    "Loaded {} whitelisted domains from {}",
                    whitelist.len(),
                    path.display()
                );
                whitelist
            }
            Err(err) => {
                warn!(
                    "Failed to read whitelist {}: {}; continuing with an empty one",
                    path.display(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Exact, case-insensitive domain lookup.
    pub fn contains(&self, domain: &str) -> bool {
        if self.domains.contains(domain) {
            return true;
        }
        self.domains.contains(&domain.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
