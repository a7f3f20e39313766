//! Scriptable in-memory backend for tests.
//!
//! [`MockConnector`] hands out [`MockConnection`]s that record every
//! statement verbatim and can be scripted to fail connects, pings, or
//! statements. All state is shared behind the connector, so a test can
//! inspect what the layer under test actually did:
//!
//! ```rust,ignore
//! let connector = MockConnector::new();
//! connector.fail_next_connects(2);
//! // ... drive the pool ...
//! assert_eq!(connector.connect_attempts(), 3);
//! assert_eq!(connector.commit_count(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::connection::{Connection, Connector};
use crate::error::BackendError;
use crate::value::{Row, Value};

#[derive(Default)]
struct MockState {
    connect_attempts: AtomicU64,
    open_connections: AtomicU64,
    pings: AtomicU64,
    fail_connects: AtomicU64,
    fail_pings: AtomicU64,
    fail_statements: AtomicU64,
    connect_delay: Mutex<Option<Duration>>,
    statement_delay: Mutex<Option<Duration>>,
    fail_matching: Mutex<Vec<String>>,
    statements: Mutex<Vec<String>>,
    queued_rows: Mutex<VecDeque<Vec<Row>>>,
}

/// A scriptable [`Connector`] whose connections share one observable state.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    /// Create a connector that succeeds at everything and returns no rows.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` connection attempts with [`BackendError::Connect`].
    pub fn fail_next_connects(&self, n: u64) {
        self.state.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` pings with [`BackendError::Query`].
    pub fn fail_next_pings(&self, n: u64) {
        self.state.fail_pings.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` statements (execute, query, or batch).
    pub fn fail_next_statements(&self, n: u64) {
        self.state.fail_statements.store(n, Ordering::SeqCst);
    }

    /// Fail any statement whose SQL contains `marker`.
    pub fn fail_matching(&self, marker: impl Into<String>) {
        self.state.fail_matching.lock().push(marker.into());
    }

    /// Delay every connect by `delay` (for acquisition-timeout tests).
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.state.connect_delay.lock() = Some(delay);
    }

    /// Delay every statement by `delay` (for query-timeout tests).
    pub fn set_statement_delay(&self, delay: Duration) {
        *self.state.statement_delay.lock() = Some(delay);
    }

    /// Queue a result set; each `query`/`query_row` call pops one set,
    /// returning no rows once the queue is empty.
    pub fn queue_rows(&self, rows: Vec<Row>) {
        self.state.queued_rows.lock().push_back(rows);
    }

    /// Total connection attempts observed (successful or not).
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Connections currently open (connected and not yet closed).
    #[must_use]
    pub fn open_connections(&self) -> u64 {
        self.state.open_connections.load(Ordering::SeqCst)
    }

    /// Total pings observed.
    #[must_use]
    pub fn ping_count(&self) -> u64 {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Every statement executed, in order, verbatim.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.state.statements.lock().clone()
    }

    /// Number of `BEGIN` statements observed.
    #[must_use]
    pub fn begin_count(&self) -> u64 {
        self.count_statement("BEGIN")
    }

    /// Number of `COMMIT` statements observed.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.count_statement("COMMIT")
    }

    /// Number of `ROLLBACK` statements observed.
    #[must_use]
    pub fn rollback_count(&self) -> u64 {
        self.count_statement("ROLLBACK")
    }

    fn count_statement(&self, verb: &str) -> u64 {
        self.state
            .statements
            .lock()
            .iter()
            .filter(|s| s.as_str() == verb)
            .count() as u64
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, BackendError> {
        self.state.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if take_scripted_failure(&self.state.fail_connects) {
            return Err(BackendError::Connect("scripted connect failure".into()));
        }

        self.state.open_connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "mock://".to_string()
    }
}

/// A connection produced by [`MockConnector`].
pub struct MockConnection {
    state: Arc<MockState>,
    closed: bool,
}

impl MockConnection {
    async fn run_statement(&mut self, sql: &str) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }

        let delay = *self.state.statement_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.state.statements.lock().push(sql.to_string());

        if take_scripted_failure(&self.state.fail_statements) {
            return Err(BackendError::Query("scripted statement failure".into()));
        }
        let matched = self
            .state
            .fail_matching
            .lock()
            .iter()
            .any(|marker| sql.contains(marker.as_str()));
        if matched {
            return Err(BackendError::Query(format!("scripted failure for: {sql}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<u64, BackendError> {
        self.run_statement(sql).await?;
        Ok(1)
    }

    async fn query(&mut self, sql: &str, _params: &[Value]) -> Result<Vec<Row>, BackendError> {
        self.run_statement(sql).await?;
        Ok(self
            .state
            .queued_rows
            .lock()
            .pop_front()
            .unwrap_or_default())
    }

    async fn query_row(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Row>, BackendError> {
        let rows = self.query(sql, params).await?;
        Ok(rows.into_iter().next())
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError> {
        self.run_statement(sql).await
    }

    async fn ping(&mut self) -> Result<(), BackendError> {
        if self.closed {
            return Err(BackendError::Closed);
        }
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if take_scripted_failure(&self.state.fail_pings) {
            return Err(BackendError::Query("scripted ping failure".into()));
        }
        Ok(())
    }

    async fn close(mut self: Box<Self>) -> Result<(), BackendError> {
        if !self.closed {
            self.closed = true;
            self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        // A discarded (not closed) connection still releases its slot.
        if !self.closed {
            self.state.open_connections.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Decrement a scripted-failure budget, returning true while budget remains.
fn take_scripted_failure(counter: &AtomicU64) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
