//! Threaded Proxy Server Module
//!
//! Thread-per-connection accept loop and the handler seam used by workers.

pub mod handler;
mod threaded;

pub use handler::{RequestHandler, RequestHead, StatusHandler};
pub use threaded::{ServerHandle, ServerState, ThreadedServer};
