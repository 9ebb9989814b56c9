//! Integration Tests for the threaded server
//!
//! Drives real loopback TCP connections through the accept loop.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde_json::Value;
use wayback_core::error::ServerError;
use wayback_core::server::ServerState;
use wayback_core::{Config, RequestHandler, ServerHandle, SharedState, StatusHandler, ThreadedServer};

// == Helper Functions ==

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn test_state() -> Arc<SharedState> {
    Arc::new(SharedState::from_config(&Config::default()).unwrap())
}

fn start<H: RequestHandler>(handler: H, max_inbound: Option<usize>) -> ServerHandle {
    let server = ThreadedServer::bind(loopback(), test_state(), handler, max_inbound).unwrap();
    let (handle, _join) = server.spawn().unwrap();
    handle
}

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        sleep(Duration::from_millis(10));
    }
    cond()
}

fn request(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(raw.as_bytes()).unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

fn body_json(response: &str) -> Value {
    let (_, body) = response.split_once("\r\n\r\n").unwrap();
    serde_json::from_str(body).unwrap()
}

/// Parks every connection until the test releases it.
struct ParkingHandler {
    active: Arc<AtomicUsize>,
    started: Arc<AtomicUsize>,
    release: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl RequestHandler for ParkingHandler {
    fn handle(&self, _stream: TcpStream, _peer: SocketAddr, _state: &SharedState) -> io::Result<()> {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.started.fetch_add(1, Ordering::SeqCst);
        let _ = self.release.lock().unwrap().recv_timeout(Duration::from_secs(10));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn parking_handler() -> (ParkingHandler, Arc<AtomicUsize>, mpsc::Sender<()>) {
    let (handler, active, _started, tx) = counting_parking_handler();
    (handler, active, tx)
}

fn counting_parking_handler() -> (ParkingHandler, Arc<AtomicUsize>, Arc<AtomicUsize>, mpsc::Sender<()>) {
    let active = Arc::new(AtomicUsize::new(0));
    let started = Arc::new(AtomicUsize::new(0));
    let (tx, rx) = mpsc::channel();
    let handler = ParkingHandler {
        active: Arc::clone(&active),
        started: Arc::clone(&started),
        release: Arc::new(Mutex::new(rx)),
    };
    (handler, active, started, tx)
}

// == Status Handler ==

#[test]
fn test_status_handler_reports_state() {
    let state = test_state();
    state
        .date_cache()
        .set("http://example.com/".to_string(), "20011025".to_string());

    let server = ThreadedServer::bind(loopback(), Arc::clone(&state), StatusHandler, None).unwrap();
    let (handle, _join) = server.spawn().unwrap();

    let response = request(
        handle.local_addr(),
        "GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n",
    );
    assert!(response.starts_with("HTTP/1.0 200 OK\r\n"));

    let json = body_json(&response);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["reference_date"], "20011025");
    assert_eq!(json["date_cache"]["total_entries"], 1);
    assert_eq!(json["pool"]["max_per_host"], 64);

    handle.shutdown();
}

#[test]
fn test_status_handler_rejects_garbage() {
    let handle = start(StatusHandler, None);

    let response = request(handle.local_addr(), "hello there\r\n\r\n");
    assert!(response.starts_with("HTTP/1.0 400 Bad Request\r\n"));
    assert!(body_json(&response)["error"].is_string());

    handle.shutdown();
}

// == Lifecycle ==

#[test]
fn test_lifecycle_transitions() {
    let server = ThreadedServer::bind(loopback(), test_state(), StatusHandler, None).unwrap();
    let handle = server.handle();
    assert_eq!(handle.state(), ServerState::Stopped);

    let (handle, join) = server.spawn().unwrap();
    assert_eq!(handle.state(), ServerState::Listening);

    handle.shutdown();
    assert_eq!(handle.state(), ServerState::Stopped);
    assert!(join.join().unwrap().is_ok());

    // Shutting down twice is harmless
    handle.shutdown();
}

#[test]
fn test_serve_forever_twice_is_rejected() {
    let server = Arc::new(ThreadedServer::bind(loopback(), test_state(), StatusHandler, None).unwrap());
    let handle = server.handle();

    let runner = {
        let server = Arc::clone(&server);
        std::thread::spawn(move || server.serve_forever())
    };
    assert!(wait_until(Duration::from_secs(2), || handle.state() == ServerState::Listening));

    assert!(matches!(server.serve_forever(), Err(ServerError::AlreadyRunning)));

    handle.shutdown();
    assert!(runner.join().unwrap().is_ok());
}

#[test]
fn test_bind_failure_is_reported() {
    let occupied = TcpListener::bind(loopback()).unwrap();
    let addr = occupied.local_addr().unwrap();

    let result = ThreadedServer::bind(addr, test_state(), StatusHandler, None);
    assert!(matches!(result, Err(ServerError::Bind { .. })));
}

#[test]
fn test_rebind_after_shutdown() {
    let server = ThreadedServer::bind(loopback(), test_state(), StatusHandler, None).unwrap();
    let addr = server.local_addr();
    let (handle, join) = server.spawn().unwrap();

    // Leave a connection in TIME_WAIT on the server side
    let response = request(addr, "GET / HTTP/1.0\r\n\r\n");
    assert!(response.starts_with("HTTP/1.0 200 OK"));

    handle.shutdown();
    drop(join.join().unwrap());
    // Listener is dropped together with the server on the accept thread

    let again = ThreadedServer::bind(addr, test_state(), StatusHandler, None);
    assert!(again.is_ok(), "rebinding {} failed", addr);
}

// == Concurrency ==

#[test]
fn test_inbound_concurrency_is_unbounded() {
    let (handler, active, release) = parking_handler();
    let handle = start(handler, None);

    let clients: Vec<TcpStream> = (0..20)
        .map(|_| TcpStream::connect(handle.local_addr()).unwrap())
        .collect();

    assert!(wait_until(Duration::from_secs(5), || active.load(Ordering::SeqCst) == 20));
    assert_eq!(handle.active_workers(), 20);

    for _ in 0..20 {
        release.send(()).unwrap();
    }
    assert!(wait_until(Duration::from_secs(5), || handle.active_workers() == 0));

    drop(clients);
    handle.shutdown();
}

#[test]
fn test_shutdown_does_not_cancel_workers() {
    let (handler, active, release) = parking_handler();
    let handle = start(handler, None);

    let _client = TcpStream::connect(handle.local_addr()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || active.load(Ordering::SeqCst) == 1));

    handle.shutdown();
    assert_eq!(handle.state(), ServerState::Stopped);

    // The in-flight worker is still parked after the accept loop exited
    assert_eq!(active.load(Ordering::SeqCst), 1);

    release.send(()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || active.load(Ordering::SeqCst) == 0));
}

#[test]
fn test_inbound_cap_delays_accept() {
    let (handler, active, started, release) = counting_parking_handler();
    let handle = start(handler, Some(2));

    let _clients: Vec<TcpStream> = (0..3)
        .map(|_| TcpStream::connect(handle.local_addr()).unwrap())
        .collect();

    assert!(wait_until(Duration::from_secs(5), || active.load(Ordering::SeqCst) == 2));
    sleep(Duration::from_millis(200));
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(handle.active_workers(), 2);

    // Freeing one slot lets the third connection in
    release.send(()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || started.load(Ordering::SeqCst) == 3));
    assert!(handle.active_workers() <= 2);

    release.send(()).unwrap();
    release.send(()).unwrap();
    assert!(wait_until(Duration::from_secs(5), || handle.active_workers() == 0));

    handle.shutdown();
}
