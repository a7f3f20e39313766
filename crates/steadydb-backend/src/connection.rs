//! The object-safe connection seam.

use async_trait::async_trait;

use crate::error::BackendError;
use crate::value::{Row, Value};

/// A factory for physical connections to one backing store.
///
/// The pool, the health checker, and the fallback manager all dial through a
/// shared `Connector`, so swapping the backing store (or substituting the
/// mock backend in tests) is a single construction-time decision.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a new physical connection.
    async fn connect(&self) -> Result<Box<dyn Connection>, BackendError>;

    /// A human-readable description of the target, safe for logs
    /// (never includes credentials).
    fn describe(&self) -> String;
}

/// One physical connection to the backing store.
///
/// Implementations are not required to be `Sync`: a connection is always
/// exclusively owned by one caller at a time (a pool slot, a request, or a
/// probe).
#[async_trait]
pub trait Connection: Send {
    /// Execute a statement that returns no rows; yields the affected-row
    /// count.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, BackendError>;

    /// Execute a query and collect all result rows.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BackendError>;

    /// Execute a query and return the first row, if any.
    async fn query_row(&mut self, sql: &str, params: &[Value])
    -> Result<Option<Row>, BackendError>;

    /// Execute a multi-statement SQL script as a single batch.
    ///
    /// Used by the migration runner; parameters are not supported.
    async fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError>;

    /// Lightweight liveness check.
    async fn ping(&mut self) -> Result<(), BackendError>;

    /// Gracefully close the connection.
    async fn close(self: Box<Self>) -> Result<(), BackendError>;
}
