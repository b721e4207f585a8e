//! certstream-server continuously mirrors newly logged certificates from the
//! public Certificate Transparency ecosystem and broadcasts them in
//! near-real-time to websocket subscribers and optional Kafka producers.
//!
//! The pipeline: a watcher spawns one poller per CT log, pollers decode and
//! normalize raw log entries into the certstream event model, and a single
//! dispatcher fans pre-serialized payloads out to bounded per-subscriber
//! queues.

pub mod api;
pub mod broadcast;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod ct_logs;
pub mod error;
pub mod metrics;
pub mod models;

pub use crate::cli::Args;
pub use crate::config::Config;
pub use crate::error::CertstreamError;

/// Result type for certstream-server operations
pub type Result<T> = std::result::Result<T, CertstreamError>;

/// User agent sent with every request against CT logs and the log list.
pub const USER_AGENT: &str = concat!(
    "Certstream Server v",
    env!("CARGO_PKG_VERSION"),
    " (certstream-server)"
);
