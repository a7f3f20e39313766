//! Pool-level error types.

use std::time::Duration;

use thiserror::Error;

use steadydb_backend::BackendError;

/// Errors from pool configuration and connection acquisition.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Invalid pool configuration; fatal at startup.
    #[error("invalid pool configuration: {message}")]
    Config {
        /// What failed validation.
        message: String,
    },

    /// The pool manager has been shut down.
    #[error("pool is closed")]
    PoolClosed,

    /// The circuit breaker is open; retry after backoff.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The pool could not supply a connection in time; retryable.
    #[error("connection acquisition timed out after {timeout:?}")]
    AcquisitionTimeout {
        /// The configured acquisition timeout.
        timeout: Duration,
    },

    /// Dialing or reusing a connection failed.
    #[error("connection acquisition failed: {source}")]
    AcquisitionFailed {
        /// The underlying backend failure.
        #[source]
        source: BackendError,
    },
}

/// Transaction lifecycle violations. These are programmer errors and are
/// always surfaced, never swallowed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    /// `begin_transaction` was called while a transaction is active (or the
    /// single-use handle already reached a terminal state).
    #[error("a transaction is already active on this connection")]
    AlreadyActive,

    /// `commit` was called with no transaction in progress.
    #[error("no active transaction")]
    NoActiveTransaction,

    /// The transaction was already committed.
    #[error("transaction already committed")]
    AlreadyCommitted,

    /// The transaction was already rolled back.
    #[error("transaction already rolled back")]
    AlreadyRolledBack,

    /// `rollback` was called after a successful commit.
    #[error("cannot roll back a committed transaction")]
    CannotRollbackCommitted,
}

/// Errors from statements run on a request-scoped connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The backing store rejected or failed the statement.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The statement exceeded its time budget (per-query timeout or the
    /// remaining transaction deadline).
    #[error("statement timed out after {timeout:?}")]
    Timeout {
        /// The budget that was exceeded.
        timeout: Duration,
    },

    /// A transaction lifecycle violation.
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

/// Health probe failures. Transient: logged and fed to the circuit breaker,
/// never propagated to request callers.
#[derive(Debug, Error)]
pub enum HealthCheckError {
    /// A probe stage did not complete within its bound.
    #[error("health probe timed out after {timeout:?}")]
    Timeout {
        /// The per-stage probe timeout.
        timeout: Duration,
    },

    /// The probe reached the store but failed.
    #[error(transparent)]
    Backend(#[from] BackendError),
}
