//! Standard (non-pooled) database access and the normalized simple-query
//! surface shared by both service modes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use steadydb_backend::{Connector, Row, Value};
use steadydb_pool::{ConnectionError, PoolManager};

use crate::error::ServiceError;

/// Simple-query surface available regardless of service mode.
///
/// Every call is a complete unit of work against the store; there is no
/// transaction control here. Use
/// [`DatabaseService::get_connection`](crate::DatabaseService::get_connection)
/// when transactions are needed.
#[async_trait]
pub trait StandardDb: Send + Sync {
    /// Execute a statement, returning the affected-row count.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, ServiceError>;

    /// Run a query, returning all rows.
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ServiceError>;

    /// Run a query, returning the first row if any.
    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, ServiceError>;

    /// Verify the store is reachable.
    async fn probe(&self) -> Result<(), ServiceError>;
}

/// Fallback access path: one fresh connection per operation, no pooling, no
/// circuit breaker.
pub struct StandardManager {
    connector: Arc<dyn Connector>,
    query_timeout: Duration,
}

impl StandardManager {
    /// Create a manager that dials through `connector` for every operation,
    /// bounding each one by `query_timeout`.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, query_timeout: Duration) -> Self {
        Self {
            connector,
            query_timeout,
        }
    }

    /// A timed-out statement in standard mode, typed so callers can tell
    /// retryable timeouts from real query failures.
    fn timed_out(&self) -> ServiceError {
        ConnectionError::Timeout {
            timeout: self.query_timeout,
        }
        .into()
    }
}

// Each operation dials, runs the statement under the query timeout, and
// closes the connection, whether the statement succeeded or not.
#[async_trait]
impl StandardDb for StandardManager {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, ServiceError> {
        let mut conn = self.connector.connect().await?;
        let result = timeout(self.query_timeout, conn.execute(sql, params)).await;
        let _ = conn.close().await;
        match result {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(self.timed_out()),
        }
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ServiceError> {
        let mut conn = self.connector.connect().await?;
        let result = timeout(self.query_timeout, conn.query(sql, params)).await;
        let _ = conn.close().await;
        match result {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(self.timed_out()),
        }
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, ServiceError> {
        let mut conn = self.connector.connect().await?;
        let result = timeout(self.query_timeout, conn.query_row(sql, params)).await;
        let _ = conn.close().await;
        match result {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(self.timed_out()),
        }
    }

    async fn probe(&self) -> Result<(), ServiceError> {
        let mut conn = self.connector.connect().await?;
        let result = timeout(self.query_timeout, conn.ping()).await;
        let _ = conn.close().await;
        match result {
            Ok(outcome) => Ok(outcome?),
            Err(_) => Err(self.timed_out()),
        }
    }
}

/// Adapts the pool manager to [`StandardDb`]: each call acquires a pooled
/// connection, runs the statement, and releases it.
pub struct PooledStandardAdapter {
    manager: Arc<PoolManager>,
}

impl PooledStandardAdapter {
    /// Wrap `manager` in the simple-query surface.
    #[must_use]
    pub fn new(manager: Arc<PoolManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl StandardDb for PooledStandardAdapter {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64, ServiceError> {
        let mut conn = self.manager.get_connection().await?;
        let result = conn.execute(sql, params).await;
        conn.close().await;
        Ok(result?)
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, ServiceError> {
        let mut conn = self.manager.get_connection().await?;
        let result = conn.query(sql, params).await;
        conn.close().await;
        Ok(result?)
    }

    async fn query_row(&self, sql: &str, params: &[Value]) -> Result<Option<Row>, ServiceError> {
        let mut conn = self.manager.get_connection().await?;
        let result = conn.query_row(sql, params).await;
        conn.close().await;
        Ok(result?)
    }

    async fn probe(&self) -> Result<(), ServiceError> {
        let mut conn = self.manager.get_connection().await?;
        let result = conn.query_row("SELECT 1", &[]).await;
        conn.close().await;
        result?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use steadydb_backend::mock::MockConnector;

    #[tokio::test]
    async fn test_standard_manager_dials_per_operation() {
        let connector = MockConnector::new();
        let manager = StandardManager::new(
            Arc::new(connector.clone()),
            Duration::from_secs(5),
        );

        manager.execute("DELETE FROM sessions", &[]).await.unwrap();
        manager.query("SELECT id FROM sessions", &[]).await.unwrap();
        manager.probe().await.unwrap();

        assert_eq!(connector.connect_attempts(), 3);
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_standard_manager_propagates_backend_errors() {
        let connector = MockConnector::new();
        connector.fail_next_statements(1);
        let manager = StandardManager::new(
            Arc::new(connector.clone()),
            Duration::from_secs(5),
        );

        let result = manager.execute("UPDATE t SET x = 1", &[]).await;
        assert!(matches!(result, Err(ServiceError::Backend(_))));
        // The failed connection was still closed.
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_standard_manager_bounds_statement_time() {
        let connector = MockConnector::new();
        connector.set_statement_delay(Duration::from_secs(60));
        let manager = StandardManager::new(
            Arc::new(connector.clone()),
            Duration::from_secs(2),
        );

        let result = manager.query_row("SELECT pg_sleep(60)", &[]).await;
        assert!(matches!(
            result,
            Err(ServiceError::Connection(ConnectionError::Timeout { .. }))
        ));
        // The stalled connection is not left open.
        assert_eq!(connector.open_connections(), 0);
    }
}
