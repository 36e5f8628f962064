//! HTTP gateway in front of the chat backend.
//!
//! - [`routes`]: Router, shared state and route handlers
//! - [`streaming`]: Chunked and SSE streaming of completion fragments
//! - [`error`]: Gateway errors rendered as JSON responses
//! - [`metrics`]: Prometheus counters and histograms

pub mod error;
pub mod metrics;
pub mod routes;
pub mod streaming;
