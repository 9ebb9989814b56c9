//! Request handlers
//!
//! The proxying logic itself lives outside this crate; it plugs in through
//! [`RequestHandler`]. [`StatusHandler`] is the built-in diagnostics handler.

use std::io::{self, BufRead, BufReader, Read, Take, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::models::ErrorResponse;
use crate::pool::{Connector, TcpConnector};
use crate::state::SharedState;

/// Upper bound on a request head, to keep a slow client from pinning a worker forever.
const HEAD_READ_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_HEAD_LINES: usize = 100;
/// Bytes a request head may span, request line included.
const MAX_HEAD_BYTES: u64 = 16 * 1024;

/// Serves one inbound connection on its worker thread.
///
/// Implementations may block (e.g. in [`crate::pool::ConnectionPool::acquire`]);
/// each connection has its own thread.
pub trait RequestHandler<C: Connector = TcpConnector>: Send + Sync + 'static {
    fn handle(&self, stream: TcpStream, peer: SocketAddr, state: &SharedState<C>) -> io::Result<()>;
}

impl<C, F> RequestHandler<C> for F
where
    C: Connector,
    F: Fn(TcpStream, SocketAddr, &SharedState<C>) -> io::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, stream: TcpStream, peer: SocketAddr, state: &SharedState<C>) -> io::Result<()> {
        self(stream, peer, state)
    }
}

// == Request Head ==
/// First line and headers of an HTTP/1.x request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Reads up to the blank line ending the head.
    ///
    /// Fails with `InvalidData` on a malformed request line or a head longer
    /// than 16 KiB.
    pub fn read_from<R: BufRead>(reader: &mut R) -> io::Result<Self> {
        let mut reader = reader.take(MAX_HEAD_BYTES);
        let mut line = String::new();
        read_head_line(&mut reader, &mut line)?;
        let mut parts = line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v)) if v.starts_with("HTTP/") => {
                (m.to_string(), t.to_string(), v.to_string())
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("malformed request line: {:?}", line.trim_end()),
                ))
            }
        };

        let mut headers = Vec::new();
        for _ in 0..MAX_HEAD_LINES {
            if read_head_line(&mut reader, &mut line)? == 0 {
                break;
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                break;
            }
            if let Some((name, value)) = trimmed.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        Ok(Self {
            method,
            target,
            version,
            headers,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Reads one line, refusing to run past the head size limit.
fn read_head_line<R: BufRead>(reader: &mut Take<R>, line: &mut String) -> io::Result<usize> {
    line.clear();
    let read = reader.read_line(line)?;
    if read > 0 && !line.ends_with('\n') && reader.limit() == 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("request head exceeds {} bytes", MAX_HEAD_BYTES),
        ));
    }
    Ok(read)
}

/// Writes a complete `Connection: close` JSON response.
pub fn write_json<W: Write, T: Serialize>(out: &mut W, status: &str, body: &T) -> io::Result<()> {
    let body = serde_json::to_vec_pretty(body).map_err(io::Error::other)?;
    write!(
        out,
        "HTTP/1.0 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    )?;
    out.write_all(&body)?;
    out.flush()
}

// == Status Handler ==
/// Answers every request with a JSON snapshot of the shared state.
///
/// Handy for checking a deployment before the real proxy handler is wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusHandler;

impl<C: Connector> RequestHandler<C> for StatusHandler {
    fn handle(&self, stream: TcpStream, peer: SocketAddr, state: &SharedState<C>) -> io::Result<()> {
        stream.set_read_timeout(Some(HEAD_READ_TIMEOUT))?;
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut out = stream;

        match RequestHead::read_from(&mut reader) {
            Ok(head) => {
                debug!("{} {} {} from {}", head.method, head.target, head.version, peer);
                write_json(&mut out, "200 OK", &state.status())
            }
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                write_json(&mut out, "400 Bad Request", &ErrorResponse::new(err.to_string()))
            }
            Err(err) => Err(err),
        }
    }
}
