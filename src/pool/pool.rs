//! Bounded per-host connection pool
//!
//! Each destination host gets a sub-pool of at most `max_per_host` live
//! connections. Sub-pools themselves live in an LRU keyed by host and capped
//! at `max_hosts`. A caller that finds its sub-pool full waits on a condvar
//! until a lease is returned or the connect timeout elapses; this wait is the
//! only backpressure between inbound workers and the archive.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::ExpiringLruCache;
use crate::error::{ConfigError, PoolError};
use crate::pool::{Connector, TcpConnector};

// == Pool Config ==
/// Limits and timeouts of a [`ConnectionPool`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Live connections allowed per destination host
    pub max_per_host: usize,
    /// Distinct host sub-pools kept before the least recently used is dropped
    pub max_hosts: usize,
    /// Wait for a free slot instead of failing fast
    pub block: bool,
    /// Bounds both waiting for a slot and opening a connection
    pub connect_timeout: Duration,
    /// Applied to every read on a pooled connection
    pub read_timeout: Duration,
    /// TLS certificate verification (off for archive traffic)
    pub verify_tls: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_host: 64,
            max_hosts: 10,
            block: true,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            verify_tls: false,
        }
    }
}

// == Pool Stats ==
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HostStats {
    pub host: String,
    pub idle: usize,
    pub leased: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PoolStats {
    /// Sub-pools, least recently used first
    pub hosts: Vec<HostStats>,
    pub max_per_host: usize,
    pub max_hosts: usize,
}

// == Host Pool ==
struct HostState<T> {
    idle: Vec<T>,
    leased: usize,
    closed: bool,
}

enum Reserved<T> {
    Idle(T),
    Fresh,
}

/// Sub-pool for a single destination host.
struct HostPool<T> {
    host: String,
    capacity: usize,
    state: Mutex<HostState<T>>,
    released: Condvar,
}

impl<T> HostPool<T> {
    // == Constructor ==
    fn new(host: &str, capacity: usize) -> Self {
        Self {
            host: host.to_string(),
            capacity,
            state: Mutex::new(HostState {
                idle: Vec::new(),
                leased: 0,
                closed: false,
            }),
            released: Condvar::new(),
        }
    }

    // == Reserve ==
    /// Claims a slot: an idle connection if one exists, otherwise the right
    /// to open a new one.
    fn reserve(&self, block: bool, timeout: Duration) -> Result<Reserved<T>, PoolError> {
        // A timeout too large to add to `now` waits without a deadline
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        loop {
            if let Some(conn) = state.idle.pop() {
                state.leased += 1;
                return Ok(Reserved::Idle(conn));
            }
            if state.leased < self.capacity {
                state.leased += 1;
                return Ok(Reserved::Fresh);
            }
            if !block {
                return Err(PoolError::Exhausted(self.host.clone()));
            }
            let timed_out = match deadline {
                Some(deadline) => self.released.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.released.wait(&mut state);
                    false
                }
            };
            if timed_out && state.idle.is_empty() && state.leased >= self.capacity {
                return Err(PoolError::Timeout {
                    host: self.host.clone(),
                    after: timeout,
                });
            }
        }
    }

    // == Release ==
    /// Takes a connection back from a lease.
    fn release(&self, conn: T) {
        let mut state = self.state.lock();
        state.leased = state.leased.saturating_sub(1);
        let surplus = if state.closed || state.idle.len() >= self.capacity {
            Some(conn)
        } else {
            state.idle.push(conn);
            None
        };
        drop(state);
        self.released.notify_one();
        // Closing the socket happens outside the lock
        drop(surplus);
    }

    // == Release Slot ==
    /// Frees a slot whose connection was never opened or was thrown away.
    fn release_slot(&self) {
        let mut state = self.state.lock();
        state.leased = state.leased.saturating_sub(1);
        drop(state);
        self.released.notify_one();
    }

    // == Close ==
    /// Drops idle connections and makes future returns close instead of pool.
    fn close(&self) {
        let idle = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        self.released.notify_all();
        drop(idle);
    }

    // == Stats ==
    fn stats(&self) -> HostStats {
        let state = self.state.lock();
        HostStats {
            host: self.host.clone(),
            idle: state.idle.len(),
            leased: state.leased,
        }
    }
}

// == Pooled Connection ==
/// A leased connection. Returned to its sub-pool when dropped.
pub struct PooledConnection<T> {
    pool: Arc<HostPool<T>>,
    conn: Option<T>,
}

impl<T> PooledConnection<T> {
    // == Constructor ==
    fn new(pool: Arc<HostPool<T>>, conn: T) -> Self {
        Self {
            pool,
            conn: Some(conn),
        }
    }

    // == Host ==
    /// Destination host this connection belongs to.
    pub fn host(&self) -> &str {
        &self.pool.host
    }

    // == Discard ==
    /// Closes the connection instead of returning it, freeing its slot.
    ///
    /// Use after an I/O error leaves the connection in an unknown state.
    pub fn discard(mut self) {
        let conn = self.conn.take();
        self.pool.release_slot();
        drop(conn);
    }
}

impl<T> Deref for PooledConnection<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `discard` and `drop` take the connection, both consume the lease
        self.conn.as_ref().expect("pooled connection already released")
    }
}

impl<T> DerefMut for PooledConnection<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.conn.as_mut().expect("pooled connection already released")
    }
}

impl<T> Drop for PooledConnection<T> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

// == Connection Pool ==
/// Per-host bounded pool of outbound connections.
pub struct ConnectionPool<C: Connector = TcpConnector> {
    connector: C,
    config: PoolConfig,
    hosts: ExpiringLruCache<String, Arc<HostPool<C::Connection>>>,
}

impl ConnectionPool<TcpConnector> {
    // == TCP Constructor ==
    /// Pool of plain TCP connections.
    pub fn tcp(config: PoolConfig) -> Result<Self, ConfigError> {
        let connector = TcpConnector::new(config.verify_tls);
        Self::new(config, connector)
    }
}

impl<C: Connector> ConnectionPool<C> {
    // == Constructor ==
    pub fn new(config: PoolConfig, connector: C) -> Result<Self, ConfigError> {
        if config.max_per_host == 0 {
            return Err(ConfigError::Invalid(
                "pool max_per_host must be greater than zero".to_string(),
            ));
        }
        let hosts = ExpiringLruCache::new(config.max_hosts, None)
            .map_err(|_| ConfigError::Invalid("pool max_hosts must be greater than zero".to_string()))?;

        info!(
            "Connection pool ready: max_per_host={}, max_hosts={}, block={}, connect_timeout={:?}, read_timeout={:?}",
            config.max_per_host, config.max_hosts, config.block, config.connect_timeout, config.read_timeout
        );

        Ok(Self {
            connector,
            config,
            hosts,
        })
    }

    // == Config ==
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    // == Acquire ==
    /// Leases a connection to `host` (`name:port`).
    ///
    /// Reuses an idle connection when possible. When the host's sub-pool is
    /// full the call blocks (if configured to) until a lease is returned, and
    /// fails with [`PoolError::Timeout`] once the connect timeout elapses.
    /// Failures are reported once and never retried here.
    pub fn acquire(&self, host: &str) -> Result<PooledConnection<C::Connection>, PoolError> {
        let capacity = self.config.max_per_host;
        let (sub_pool, evicted) = self
            .hosts
            .get_or_insert_with(host.to_string(), || Arc::new(HostPool::new(host, capacity)));

        for (old_host, old_pool) in evicted {
            debug!("Evicting connection pool for {}", old_host);
            old_pool.close();
        }

        let reserved = sub_pool
            .reserve(self.config.block, self.config.connect_timeout)
            .inspect_err(|err| warn!("Connection acquisition failed: {}", err))?;

        match reserved {
            Reserved::Idle(conn) => Ok(PooledConnection::new(sub_pool, conn)),
            Reserved::Fresh => {
                match self.connector.connect(
                    host,
                    self.config.connect_timeout,
                    self.config.read_timeout,
                ) {
                    Ok(conn) => Ok(PooledConnection::new(sub_pool, conn)),
                    Err(source) => {
                        sub_pool.release_slot();
                        warn!("Failed to connect to {}: {}", host, source);
                        Err(PoolError::Connect {
                            host: host.to_string(),
                            source,
                        })
                    }
                }
            }
        }
    }

    // == Stats ==
    /// Snapshot of every live sub-pool.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hosts: self.hosts.values().map(|pool| pool.stats()).collect(),
            max_per_host: self.config.max_per_host,
            max_hosts: self.config.max_hosts,
        }
    }
}
