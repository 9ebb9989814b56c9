//! Outbound Connection Pool Module
//!
//! Per-host bounded pooling of outbound connections. Blocking acquisition is
//! the proxy's admission control: inbound workers are unbounded, outbound
//! connections are not.

mod connector;
#[allow(clippy::module_inception)]
mod pool;

pub use connector::{Connector, TcpConnector};
pub use pool::{ConnectionPool, HostStats, PoolConfig, PoolStats, PooledConnection};
