//! Error types for the proxy core
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Errors raised by [`crate::cache::ExpiringLruCache`].
///
/// A cache miss is not an error; only `ttl` on an absent key and invalid
/// construction parameters surface here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Key not found in cache
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Cache constructed with unusable parameters
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),
}

// == Pool Error Enum ==
/// Errors surfaced once to the caller of [`crate::pool::ConnectionPool::acquire`].
///
/// The pool never retries; retry policy belongs to the request handler.
#[derive(Error, Debug)]
pub enum PoolError {
    /// No connection became available before the connect timeout
    #[error("Timed out after {after:?} waiting for a connection to {host}")]
    Timeout { host: String, after: Duration },

    /// Sub-pool is full and the pool is configured not to block
    #[error("Connection pool for {0} is exhausted")]
    Exhausted(String),

    /// Opening a new outbound connection failed
    #[error("Failed to connect to {host}: {source}")]
    Connect {
        host: String,
        #[source]
        source: io::Error,
    },
}

impl PoolError {
    /// Returns true for failures caused by an elapsed timeout.
    pub fn is_timeout(&self) -> bool {
        match self {
            PoolError::Timeout { .. } => true,
            PoolError::Connect { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            PoolError::Exhausted(_) => false,
        }
    }
}

// == Server Error Enum ==
/// Errors raised by the threaded server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Listening socket could not be bound; fatal at startup
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// `serve_forever` called while the accept loop is already running
    #[error("Server is already running")]
    AlreadyRunning,

    /// Accept loop or worker spawn failure
    #[error("Server I/O error: {0}")]
    Io(#[from] io::Error),

    /// Shutdown signal handler could not be installed
    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

// == Config Error Enum ==
/// Errors raised while loading or validating [`crate::config::Config`].
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file exists but could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),

    /// Config file is not valid JSON for the expected shape
    #[error("Malformed config file: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of its allowed range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// == Result Type Alias ==
/// Convenience Result type, defaulting to cache errors.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_classification() {
        let err = PoolError::Timeout {
            host: "web.archive.org".to_string(),
            after: Duration::from_secs(10),
        };
        assert!(err.is_timeout());

        let err = PoolError::Connect {
            host: "web.archive.org".to_string(),
            source: io::Error::new(io::ErrorKind::TimedOut, "connect"),
        };
        assert!(err.is_timeout());

        let err = PoolError::Connect {
            host: "web.archive.org".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(!err.is_timeout());
        assert!(!PoolError::Exhausted("a".to_string()).is_timeout());
    }

    #[test]
    fn test_error_messages() {
        let err = CacheError::NotFound("http://example.com/".to_string());
        assert_eq!(err.to_string(), "Key not found: http://example.com/");

        let err = ConfigError::Invalid("bad port".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad port");
    }
}
