// Error types for certstream-server
//
// Structured error types using thiserror. Every fallible operation in the
// crate returns the crate-wide Result alias defined in lib.rs.

use std::io;
use thiserror::Error;

/// Main error type for certstream-server operations
#[derive(Debug, Error)]
pub enum CertstreamError {
    /// Invalid or missing configuration; fatal at startup
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Log-list HTTP or parse failure; retried on the next refresh tick
    #[error("Log list fetch failed: {message}")]
    RegistryFetch { message: String },

    /// Checkpoint file read/write failure
    #[error("Checkpoint I/O error for '{path}': {source}")]
    CheckpointIo {
        path: String,
        #[source]
        source: io::Error,
    },

    /// HTTP client could not be constructed; fatal for the affected poller
    #[error("Failed to create log client for '{url}': {message}")]
    ClientCreation { url: String, message: String },

    /// Initial signed tree head could not be fetched; fatal for the affected poller
    #[error("Failed to fetch STH from '{url}': {message}")]
    SthFetch { url: String, message: String },

    /// Recoverable fetch failure; the poller sleeps and retries
    #[error("Transient fetch error: {message}")]
    TransientFetch { message: String },

    /// A log entry could not be decoded; the entry is dropped
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// A binary data tile could not be decoded
    #[error("Tile parse error: {message}")]
    TileParse { message: String },

    /// Non-success HTTP status from a remote endpoint
    #[error("HTTP error (status {status}): {details}")]
    Http { status: u16, details: String },

    /// Reqwest transport errors
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CertstreamError {
    /// Errors that permanently stop a poller. Everything else is retried
    /// after a short sleep from the current cursor.
    pub fn is_fatal_for_poller(&self) -> bool {
        matches!(
            self,
            CertstreamError::ClientCreation { .. } | CertstreamError::SthFetch { .. }
        )
    }
}
