//! Thread-per-connection server
//!
//! The accept loop hands every inbound connection to a freshly spawned,
//! detached worker thread and goes straight back to accepting. Nothing here
//! limits how many workers exist unless `max_inbound` is set; the outbound
//! pool's blocking acquisition is what throttles real work.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::ServerError;
use crate::pool::{Connector, TcpConnector};
use crate::server::RequestHandler;
use crate::state::SharedState;

/// Poll interval while waiting for a worker slot, so shutdown is noticed.
const SLOT_POLL: Duration = Duration::from_millis(100);
/// Back-off after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

// == Server State ==
/// Lifecycle: `Stopped → Listening → ShuttingDown → Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    Stopped,
    Listening,
    ShuttingDown,
}

struct Lifecycle {
    state: Mutex<ServerState>,
    changed: Condvar,
}

impl Lifecycle {
    fn new() -> Self {
        Self {
            state: Mutex::new(ServerState::Stopped),
            changed: Condvar::new(),
        }
    }

    fn get(&self) -> ServerState {
        *self.state.lock()
    }

    fn set(&self, next: ServerState) {
        *self.state.lock() = next;
        self.changed.notify_all();
    }
}

// == Worker Slots ==
/// Counts live workers and optionally caps them.
struct WorkerSlots {
    active: Mutex<usize>,
    freed: Condvar,
    limit: Option<usize>,
}

struct WorkerPermit {
    slots: Arc<WorkerSlots>,
}

impl WorkerSlots {
    fn new(limit: Option<usize>) -> Self {
        Self {
            active: Mutex::new(0),
            freed: Condvar::new(),
            limit,
        }
    }

    /// Waits for a slot; gives up with `None` once `keep_waiting` says so.
    fn acquire(self: &Arc<Self>, keep_waiting: impl Fn() -> bool) -> Option<WorkerPermit> {
        let mut active = self.active.lock();
        if let Some(limit) = self.limit {
            while *active >= limit {
                if !keep_waiting() {
                    return None;
                }
                self.freed.wait_for(&mut active, SLOT_POLL);
            }
        }
        *active += 1;
        Some(WorkerPermit {
            slots: Arc::clone(self),
        })
    }

    fn active(&self) -> usize {
        *self.active.lock()
    }
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        let mut active = self.slots.active.lock();
        *active = active.saturating_sub(1);
        drop(active);
        self.slots.freed.notify_one();
    }
}

// == Server Handle ==
/// Cloneable remote control for a running [`ThreadedServer`].
#[derive(Clone)]
pub struct ServerHandle {
    lifecycle: Arc<Lifecycle>,
    slots: Arc<WorkerSlots>,
    addr: SocketAddr,
}

impl ServerHandle {
    pub fn state(&self) -> ServerState {
        self.lifecycle.get()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Workers currently serving a connection.
    pub fn active_workers(&self) -> usize {
        self.slots.active()
    }

    /// Stops the accept loop and waits until it has exited.
    ///
    /// Workers already spawned keep running to completion; nothing cancels them.
    pub fn shutdown(&self) {
        {
            let mut state = self.lifecycle.state.lock();
            match *state {
                ServerState::Stopped => return,
                ServerState::Listening => {
                    info!("Shutting down proxy server on {}", self.addr);
                    *state = ServerState::ShuttingDown;
                    self.lifecycle.changed.notify_all();
                }
                ServerState::ShuttingDown => {}
            }
        }

        // The accept loop is parked in accept(); a throwaway connection wakes it
        if let Err(err) = TcpStream::connect_timeout(&wake_addr(self.addr), Duration::from_secs(1)) {
            debug!("Wake-up connection to {} failed: {}", self.addr, err);
        }

        let mut state = self.lifecycle.state.lock();
        while *state != ServerState::Stopped {
            self.lifecycle.changed.wait(&mut state);
        }
    }

    // == Shutdown On Signal ==
    /// Calls [`shutdown`](Self::shutdown) on Ctrl+C or SIGTERM.
    ///
    /// Only one handler may be installed per process.
    pub fn shutdown_on_signal(&self) -> Result<(), ServerError> {
        let handle = self.clone();
        ctrlc::set_handler(move || {
            info!("Received shutdown signal, initiating shutdown...");
            handle.shutdown();
        })?;
        Ok(())
    }
}

/// Loopback address reaching a listener bound to `addr`.
fn wake_addr(addr: SocketAddr) -> SocketAddr {
    let ip = match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        ip => ip,
    };
    SocketAddr::new(ip, addr.port())
}

// == Threaded Server ==
/// Listening socket plus everything each worker needs.
pub struct ThreadedServer<C: Connector = TcpConnector> {
    listener: TcpListener,
    addr: SocketAddr,
    state: Arc<SharedState<C>>,
    handler: Arc<dyn RequestHandler<C>>,
    lifecycle: Arc<Lifecycle>,
    slots: Arc<WorkerSlots>,
}

impl<C: Connector + 'static> ThreadedServer<C> {
    /// Binds the listening socket.
    ///
    /// On Unix the standard library sets `SO_REUSEADDR`, so a restart can
    /// rebind immediately. A bind failure is returned as
    /// [`ServerError::Bind`] and should abort startup.
    pub fn bind<H>(
        addr: SocketAddr,
        state: Arc<SharedState<C>>,
        handler: H,
        max_inbound: Option<usize>,
    ) -> Result<Self, ServerError>
    where
        H: RequestHandler<C>,
    {
        let listener = TcpListener::bind(addr).map_err(|source| ServerError::Bind { addr, source })?;
        let addr = listener.local_addr()?;
        info!(
            "Proxy server bound to {} (inbound cap: {})",
            addr,
            max_inbound.map_or_else(|| "none".to_string(), |n| n.to_string())
        );

        Ok(Self {
            listener,
            addr,
            state,
            handler: Arc::new(handler),
            lifecycle: Arc::new(Lifecycle::new()),
            slots: Arc::new(WorkerSlots::new(max_inbound)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            lifecycle: Arc::clone(&self.lifecycle),
            slots: Arc::clone(&self.slots),
            addr: self.addr,
        }
    }

    /// Runs the accept loop on the calling thread until [`ServerHandle::shutdown`].
    pub fn serve_forever(&self) -> Result<(), ServerError> {
        {
            let mut state = self.lifecycle.state.lock();
            if *state != ServerState::Stopped {
                return Err(ServerError::AlreadyRunning);
            }
            *state = ServerState::Listening;
            self.lifecycle.changed.notify_all();
        }
        info!("Proxy server listening on {}", self.addr);

        let result = self.accept_loop();

        self.lifecycle.set(ServerState::Stopped);
        info!("Proxy server on {} stopped", self.addr);
        result
    }

    fn accept_loop(&self) -> Result<(), ServerError> {
        let listening = || self.lifecycle.get() == ServerState::Listening;

        while listening() {
            let Some(permit) = self.slots.acquire(listening) else {
                break;
            };

            let (stream, peer) = match self.listener.accept() {
                Ok(conn) => conn,
                Err(err) => {
                    warn!("Failed to accept connection: {}", err);
                    thread::sleep(ACCEPT_BACKOFF);
                    continue;
                }
            };

            if !listening() {
                // Most likely the shutdown wake-up connection
                break;
            }

            self.spawn_worker(stream, peer, permit)?;
        }
        Ok(())
    }

    fn spawn_worker(&self, stream: TcpStream, peer: SocketAddr, permit: WorkerPermit) -> Result<(), ServerError> {
        let state = Arc::clone(&self.state);
        let handler = Arc::clone(&self.handler);

        // Detached: dropping the JoinHandle means process exit never waits on it
        let spawned = thread::Builder::new()
            .name(format!("worker-{}", peer))
            .spawn(move || {
                let _permit = permit;
                if let Err(err) = handler.handle(stream, peer, &state) {
                    debug!("Connection from {} ended with error: {}", peer, err);
                }
            });

        match spawned {
            Ok(_detached) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                error!("Cannot spawn worker for {}: {}", peer, err);
                Ok(())
            }
            Err(err) => Err(ServerError::Io(err)),
        }
    }
}

impl<C: Connector + 'static> ThreadedServer<C> {
    /// Runs [`serve_forever`](Self::serve_forever) on a background thread.
    ///
    /// Returns once the server is listening.
    pub fn spawn(self) -> io::Result<(ServerHandle, JoinHandle<Result<(), ServerError>>)> {
        let handle = self.handle();
        let join = thread::Builder::new()
            .name("proxy-accept".to_string())
            .spawn(move || self.serve_forever())?;

        let mut state = handle.lifecycle.state.lock();
        while *state == ServerState::Stopped && !join.is_finished() {
            handle.lifecycle.changed.wait_for(&mut state, SLOT_POLL);
        }
        drop(state);

        Ok((handle, join))
    }
}
