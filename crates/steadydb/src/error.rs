//! Service-level error types.

use steadydb_backend::BackendError;
use steadydb_pool::{ConnectionError, PoolError};

/// Errors surfaced by the service facade.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Invalid or incomplete configuration.
    #[error("configuration error: {message}")]
    Config {
        /// What was wrong with the configuration.
        message: String,
    },

    /// A pool-layer failure.
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A statement or transaction failure on a connection.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// A backend failure outside the pooled path (standard mode).
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The requested operation is not available in the current service mode.
    #[error("operation not supported in {mode} mode: {operation}")]
    UnsupportedOperation {
        /// The active service mode.
        mode: &'static str,
        /// The operation that was requested.
        operation: &'static str,
    },

    /// A migration file failed to apply.
    #[error("migration {file} failed: {source}")]
    Migration {
        /// The migration filename.
        file: String,
        /// The underlying failure.
        source: ConnectionError,
    },

    /// Reading the migrations directory or a migration file failed.
    #[error("cannot read migrations at {path}: {source}")]
    MigrationIo {
        /// The directory or file that could not be read.
        path: String,
        /// The I/O failure.
        source: std::io::Error,
    },

    /// One or more shutdown steps failed; every failure is retained.
    #[error("shutdown incomplete: {}", .0.join("; "))]
    CloseFailed(Vec<String>),
}
