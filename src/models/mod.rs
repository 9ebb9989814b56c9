//! Response models for the diagnostics handler
//!
//! Serialized with serde_json into HTTP response bodies.

pub mod responses;

// Re-export commonly used types
pub use responses::{CacheSummary, ErrorResponse, StatusResponse};
