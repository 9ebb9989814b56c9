//! Outbound connectors
//!
//! The pool decides how many connections exist; a [`Connector`] only knows how
//! to open one.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

/// Opens new outbound connections for the pool.
pub trait Connector: Send + Sync {
    type Connection: Send;

    /// Opens a connection to `host` (`name:port`).
    ///
    /// `connect_timeout` bounds the connect itself; `read_timeout` must be
    /// applied to every later read on the returned connection.
    fn connect(
        &self,
        host: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> io::Result<Self::Connection>;
}

// == TCP Connector ==
/// Plain TCP connector over `std::net`.
///
/// `verify_tls` is carried for TLS-wrapping callers. Archive captures are
/// frequently served with expired or mismatched certificates, so the default
/// is to skip verification.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    pub verify_tls: bool,
}

impl TcpConnector {
    pub fn new(verify_tls: bool) -> Self {
        Self { verify_tls }
    }
}

impl Connector for TcpConnector {
    type Connection = TcpStream;

    fn connect(
        &self,
        host: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> io::Result<TcpStream> {
        let mut last_err = None;

        for addr in host.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(read_timeout))?;
                    stream.set_nodelay(true)?;
                    debug!("Connected to {} ({})", host, addr);
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }

        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} did not resolve to any address", host),
            )
        }))
    }
}
