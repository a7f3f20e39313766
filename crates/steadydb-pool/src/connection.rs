//! Request-scoped connection with a strict transaction lifecycle.

use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::time::{Instant, timeout};

use steadydb_backend::{BackendError, Row, TransactionOptions, Value};

use crate::error::{ConnectionError, TransactionError};
use crate::pool::PooledConn;

/// One caller's checked-out unit of work.
///
/// The handle is single-use: it supports at most one transaction, and once
/// that transaction reaches a terminal state (committed or rolled back) no
/// further transaction can be started. [`close`](RequestConnection::close)
/// is mandatory: it rolls back any still-open transaction and returns the
/// connection to the pool. A handle that is dropped without `close` discards
/// its physical connection, which aborts any open transaction server-side.
///
/// Prefer [`with_transaction`](RequestConnection::with_transaction) over
/// manual begin/commit/rollback.
pub struct RequestConnection {
    handle: Option<PooledConn>,
    query_timeout: Duration,
    in_transaction: bool,
    committed: bool,
    rolled_back: bool,
    tx_deadline: Option<Instant>,
    broken: bool,
}

impl RequestConnection {
    pub(crate) fn new(handle: PooledConn, query_timeout: Duration) -> Self {
        Self {
            handle: Some(handle),
            query_timeout,
            in_transaction: false,
            committed: false,
            rolled_back: false,
            tx_deadline: None,
            broken: false,
        }
    }

    /// Whether a transaction is currently active.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Whether the transaction was committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    /// Whether the transaction was rolled back.
    #[must_use]
    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back
    }

    /// Execute a statement; affected-row count on success.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, ConnectionError> {
        let budget = self.statement_budget()?;
        let conn = self.conn_mut()?;
        match timeout(budget, conn.execute(sql, params)).await {
            Ok(Ok(affected)) => Ok(affected),
            Ok(Err(err)) => Err(self.statement_failed(err)),
            Err(_) => Err(self.statement_timed_out(budget)),
        }
    }

    /// Execute a query and collect all rows.
    pub async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ConnectionError> {
        let budget = self.statement_budget()?;
        let conn = self.conn_mut()?;
        match timeout(budget, conn.query(sql, params)).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(err)) => Err(self.statement_failed(err)),
            Err(_) => Err(self.statement_timed_out(budget)),
        }
    }

    /// Execute a query and return the first row, if any.
    pub async fn query_row(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Row>, ConnectionError> {
        let budget = self.statement_budget()?;
        let conn = self.conn_mut()?;
        match timeout(budget, conn.query_row(sql, params)).await {
            Ok(Ok(row)) => Ok(row),
            Ok(Err(err)) => Err(self.statement_failed(err)),
            Err(_) => Err(self.statement_timed_out(budget)),
        }
    }

    /// Begin a transaction.
    ///
    /// Fails with [`TransactionError::AlreadyActive`] if a transaction is
    /// active or the handle has already run its one transaction. Honors the
    /// isolation level, read-only flag, and whole-transaction timeout from
    /// `opts`.
    pub async fn begin_transaction(
        &mut self,
        opts: TransactionOptions,
    ) -> Result<(), ConnectionError> {
        if self.in_transaction || self.committed || self.rolled_back {
            return Err(TransactionError::AlreadyActive.into());
        }

        self.run_control("BEGIN").await?;
        // The transaction is open from here on, so any failure below still
        // leaves a state that close() resolves with a rollback.
        self.in_transaction = true;

        if let Some(isolation) = opts.isolation {
            self.run_control(isolation.as_set_sql()).await?;
        }
        if opts.read_only {
            self.run_control("SET TRANSACTION READ ONLY").await?;
        }
        self.tx_deadline = opts.timeout.map(|t| Instant::now() + t);
        Ok(())
    }

    /// Commit the active transaction.
    pub async fn commit(&mut self) -> Result<(), ConnectionError> {
        if self.committed {
            return Err(TransactionError::AlreadyCommitted.into());
        }
        if self.rolled_back {
            return Err(TransactionError::AlreadyRolledBack.into());
        }
        if !self.in_transaction {
            return Err(TransactionError::NoActiveTransaction.into());
        }

        self.run_control("COMMIT").await?;
        self.committed = true;
        self.in_transaction = false;
        self.tx_deadline = None;
        Ok(())
    }

    /// Roll back the active transaction.
    ///
    /// A no-op (not an error) when no transaction was ever begun; fails with
    /// [`TransactionError::CannotRollbackCommitted`] after a commit and
    /// [`TransactionError::AlreadyRolledBack`] after a rollback.
    pub async fn rollback(&mut self) -> Result<(), ConnectionError> {
        if self.committed {
            return Err(TransactionError::CannotRollbackCommitted.into());
        }
        if self.rolled_back {
            return Err(TransactionError::AlreadyRolledBack.into());
        }
        if !self.in_transaction {
            return Ok(());
        }

        self.run_control("ROLLBACK").await?;
        self.rolled_back = true;
        self.in_transaction = false;
        self.tx_deadline = None;
        Ok(())
    }

    /// Run `f` inside a transaction: begin, invoke, commit on `Ok`, roll
    /// back (and return the original error) on `Err`.
    ///
    /// Exactly one commit or one rollback happens per call. If `f` panics,
    /// the unwind leaves the transaction open and the close/drop backstop
    /// discards the connection, which aborts the transaction server-side.
    ///
    /// ```rust,ignore
    /// let total = conn
    ///     .with_transaction(TransactionOptions::new(), |tx| {
    ///         Box::pin(async move {
    ///             tx.execute("INSERT INTO audit (op) VALUES ($1)", &[op]).await?;
    ///             tx.query_row("SELECT count(*) FROM audit", &[]).await
    ///         })
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_transaction<T, F>(
        &mut self,
        opts: TransactionOptions,
        f: F,
    ) -> Result<T, ConnectionError>
    where
        F: for<'c> FnOnce(&'c mut RequestConnection) -> BoxFuture<'c, Result<T, ConnectionError>>,
    {
        self.begin_transaction(opts).await?;
        match f(self).await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::error!(
                        error = %rollback_err,
                        "rollback failed after transaction error"
                    );
                }
                Err(err)
            }
        }
    }

    /// Close the handle: roll back any still-open transaction, then return
    /// the connection to the pool. Safe to call multiple times.
    pub async fn close(&mut self) {
        if self.in_transaction {
            tracing::warn!("closing connection with an open transaction, rolling back");
            if let Err(err) = self.rollback().await {
                tracing::error!(error = %err, "forced rollback failed, discarding connection");
                self.broken = true;
                self.in_transaction = false;
            }
        }
        if let Some(handle) = self.handle.take() {
            handle.release(self.broken).await;
        }
    }

    /// Transaction and commit/rollback statements: bounded by the plain
    /// query timeout, not the transaction deadline, so an expired
    /// transaction can still be resolved.
    async fn run_control(&mut self, sql: &str) -> Result<(), ConnectionError> {
        let budget = self.query_timeout;
        let conn = self.conn_mut()?;
        match timeout(budget, conn.execute(sql, &[])).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => {
                self.broken = true;
                Err(err.into())
            }
            Err(_) => Err(self.statement_timed_out(budget)),
        }
    }

    fn conn_mut(&mut self) -> Result<&mut (dyn steadydb_backend::Connection + 'static), ConnectionError> {
        self.handle
            .as_mut()
            .and_then(PooledConn::connection)
            .ok_or(ConnectionError::Backend(BackendError::Closed))
    }

    /// The time budget for the next statement: the per-query timeout capped
    /// by the remaining transaction deadline.
    fn statement_budget(&self) -> Result<Duration, ConnectionError> {
        let mut budget = self.query_timeout;
        if let Some(deadline) = self.tx_deadline {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectionError::Timeout { timeout: budget });
            }
            budget = budget.min(remaining);
        }
        Ok(budget)
    }

    /// A timed-out statement leaves the connection in an unknown state, so it
    /// must not be reused.
    fn statement_timed_out(&mut self, budget: Duration) -> ConnectionError {
        self.broken = true;
        ConnectionError::Timeout { timeout: budget }
    }

    /// A failed statement inside a transaction (or any fatal backend error)
    /// marks the connection broken so the pool discards it on release.
    fn statement_failed(&mut self, err: BackendError) -> ConnectionError {
        if self.in_transaction || err.is_fatal() {
            self.broken = true;
        }
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use steadydb_backend::IsolationLevel;
    use steadydb_backend::mock::MockConnector;

    use crate::config::{Environment, PoolConfig};
    use crate::pool::ConnectionPool;

    async fn checkout(connector: &MockConnector) -> RequestConnection {
        let config = PoolConfig::for_environment(Environment::Development);
        let pool = ConnectionPool::new(Arc::new(connector.clone()), config);
        let handle = pool.acquire().await.unwrap();
        RequestConnection::new(handle, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_begin_twice_rejected() {
        let connector = MockConnector::new();
        let mut conn = checkout(&connector).await;

        conn.begin_transaction(TransactionOptions::new()).await.unwrap();
        let err = conn.begin_transaction(TransactionOptions::new()).await;
        assert!(matches!(
            err,
            Err(ConnectionError::Transaction(TransactionError::AlreadyActive))
        ));
        conn.close().await;
    }

    #[tokio::test]
    async fn test_commit_then_commit_and_rollback_rejected() {
        let connector = MockConnector::new();
        let mut conn = checkout(&connector).await;

        conn.begin_transaction(TransactionOptions::new()).await.unwrap();
        conn.commit().await.unwrap();

        assert!(matches!(
            conn.commit().await,
            Err(ConnectionError::Transaction(TransactionError::AlreadyCommitted))
        ));
        assert!(matches!(
            conn.rollback().await,
            Err(ConnectionError::Transaction(
                TransactionError::CannotRollbackCommitted
            ))
        ));
        conn.close().await;
        assert_eq!(connector.commit_count(), 1);
        assert_eq!(connector.rollback_count(), 0);
    }

    #[tokio::test]
    async fn test_commit_without_begin_rejected() {
        let connector = MockConnector::new();
        let mut conn = checkout(&connector).await;

        assert!(matches!(
            conn.commit().await,
            Err(ConnectionError::Transaction(TransactionError::NoActiveTransaction))
        ));
        conn.close().await;
    }

    #[tokio::test]
    async fn test_rollback_without_transaction_is_noop() {
        let connector = MockConnector::new();
        let mut conn = checkout(&connector).await;

        conn.rollback().await.unwrap();
        conn.close().await;
        assert_eq!(connector.rollback_count(), 0);
    }

    #[tokio::test]
    async fn test_double_explicit_rollback_rejected() {
        let connector = MockConnector::new();
        let mut conn = checkout(&connector).await;

        conn.begin_transaction(TransactionOptions::new()).await.unwrap();
        conn.rollback().await.unwrap();
        assert!(matches!(
            conn.rollback().await,
            Err(ConnectionError::Transaction(TransactionError::AlreadyRolledBack))
        ));
        conn.close().await;
        assert_eq!(connector.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_begin_emits_isolation_and_read_only() {
        let connector = MockConnector::new();
        let mut conn = checkout(&connector).await;

        let opts = TransactionOptions::new()
            .isolation(IsolationLevel::Serializable)
            .read_only(true);
        conn.begin_transaction(opts).await.unwrap();
        conn.commit().await.unwrap();
        conn.close().await;

        let statements = connector.statements();
        assert_eq!(
            statements,
            vec![
                "BEGIN",
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
                "SET TRANSACTION READ ONLY",
                "COMMIT",
            ]
        );
    }

    #[tokio::test]
    async fn test_with_transaction_commits_on_ok() {
        let connector = MockConnector::new();
        let mut conn = checkout(&connector).await;

        let result: Result<u64, ConnectionError> = conn
            .with_transaction(TransactionOptions::new(), |tx| {
                Box::pin(async move { tx.execute("INSERT INTO t VALUES (1)", &[]).await })
            })
            .await;

        assert_eq!(result.unwrap(), 1);
        conn.close().await;
        assert_eq!(connector.begin_count(), 1);
        assert_eq!(connector.commit_count(), 1);
        assert_eq!(connector.rollback_count(), 0);
    }

    #[tokio::test]
    async fn test_with_transaction_rolls_back_on_error() {
        let connector = MockConnector::new();
        connector.fail_matching("boom");
        let mut conn = checkout(&connector).await;

        let result: Result<u64, ConnectionError> = conn
            .with_transaction(TransactionOptions::new(), |tx| {
                Box::pin(async move { tx.execute("SELECT boom", &[]).await })
            })
            .await;

        assert!(matches!(result, Err(ConnectionError::Backend(_))));
        conn.close().await;
        assert_eq!(connector.commit_count(), 0);
        assert_eq!(connector.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_close_rolls_back_open_transaction() {
        let connector = MockConnector::new();
        let mut conn = checkout(&connector).await;

        conn.begin_transaction(TransactionOptions::new()).await.unwrap();
        conn.execute("UPDATE t SET x = 1", &[]).await.unwrap();
        conn.close().await;
        // Close again: must be a no-op.
        conn.close().await;

        assert_eq!(connector.rollback_count(), 1);
        assert_eq!(connector.commit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_statement_times_out_and_breaks_connection() {
        let connector = MockConnector::new();
        connector.set_statement_delay(Duration::from_secs(30));
        let mut conn = checkout(&connector).await;

        let result = conn.execute("SELECT pg_sleep(60)", &[]).await;
        assert!(matches!(result, Err(ConnectionError::Timeout { .. })));
        conn.close().await;

        // The broken connection was discarded, not parked for reuse.
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transaction_deadline_bounds_statements() {
        let connector = MockConnector::new();
        let mut conn = checkout(&connector).await;

        let opts = TransactionOptions::new().timeout(Duration::from_secs(2));
        conn.begin_transaction(opts).await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;
        let result = conn.execute("SELECT 1", &[]).await;
        assert!(matches!(result, Err(ConnectionError::Timeout { .. })));

        // The transaction can still be resolved after the deadline.
        conn.rollback().await.unwrap();
        conn.close().await;
        assert_eq!(connector.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_statement_failure_in_transaction_discards_connection() {
        let connector = MockConnector::new();
        let config = PoolConfig::for_environment(Environment::Development);
        let pool = ConnectionPool::new(Arc::new(connector.clone()), config);

        let handle = pool.acquire().await.unwrap();
        let mut conn = RequestConnection::new(handle, Duration::from_secs(5));
        conn.begin_transaction(TransactionOptions::new()).await.unwrap();

        connector.fail_next_statements(1);
        assert!(conn.execute("UPDATE t SET x = 1", &[]).await.is_err());
        conn.close().await;
        assert_eq!(connector.rollback_count(), 1);

        // The connection was not parked for reuse.
        let handle = pool.acquire().await.unwrap();
        handle.release(false).await;
        assert_eq!(connector.connect_attempts(), 2);
    }
}
