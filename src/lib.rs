//! Wayback Core - shared runtime of a time-travelling HTTP proxy
//!
//! Provides the expiring LRU caches, the bounded outbound connection pool and
//! the thread-per-connection server that the request handler runs on.

pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod pool;
pub mod server;
pub mod state;

pub use cache::{ExpiringLruCache, SnapshotInfo};
pub use config::Config;
pub use pool::{ConnectionPool, PoolConfig};
pub use server::{RequestHandler, ServerHandle, StatusHandler, ThreadedServer};
pub use state::{SharedState, Whitelist};
