//! Backend-level error types.

use thiserror::Error;

/// Errors that can occur while talking to the backing store.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Establishing a physical connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A statement failed on the server or in transit.
    #[error("query failed: {0}")]
    Query(String),

    /// A result column could not be decoded into a [`Value`](crate::Value).
    #[error("failed to decode column {column}: {message}")]
    Decode {
        /// Column name as reported by the server.
        column: String,
        /// Driver-level decode failure.
        message: String,
    },

    /// The connection has already been closed.
    #[error("connection closed")]
    Closed,
}

impl BackendError {
    /// Whether the error indicates the physical connection is unusable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Closed)
    }
}
