//! The bounded connection pool that owns the physical connections.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use steadydb_backend::{Connection, Connector};

use crate::config::PoolConfig;
use crate::error::PoolError;

struct IdleConn {
    conn: Box<dyn Connection>,
    created_at: Instant,
    idle_since: Instant,
}

/// A bounded set of physical connections created through one [`Connector`].
///
/// Capacity is enforced with a semaphore (`max_open` permits, held for the
/// whole checkout); released connections are retained on an idle list up to
/// `max_idle`, and idle connections past their lifetime or idle-time bound
/// are closed instead of reused.
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConn>>,
    closed: AtomicBool,
    active: AtomicU64,
    config: PoolConfig,
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    /// Connections currently checked out.
    pub active: u64,
    /// Connections currently idle.
    pub idle: u64,
    /// Configured maximum open connections.
    pub max_open: u32,
}

impl ConnectionPool {
    /// Create a pool over `connector`. No connections are dialed up front;
    /// the pool fills lazily as callers acquire.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Arc<Self> {
        let max_open = config.max_open as usize;
        Arc::new(Self {
            connector,
            semaphore: Arc::new(Semaphore::new(max_open)),
            idle: Mutex::new(VecDeque::with_capacity(config.max_idle as usize)),
            closed: AtomicBool::new(false),
            active: AtomicU64::new(0),
            config,
        })
    }

    /// Acquire a connection: a capacity permit, then an idle connection if a
    /// fresh one is available, otherwise a new dial.
    ///
    /// This call blocks until capacity frees up; the manager bounds it with
    /// the configured acquisition timeout. Cancelling the returned future
    /// releases the permit and never leaks a half-established connection.
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConn, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }

        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::PoolClosed)?;

        // Reuse the freshest idle connection that is still within its
        // lifetime and idle-time bounds; expired ones are closed here.
        loop {
            let candidate = self.idle.lock().pop_back();
            let Some(idle) = candidate else { break };

            if idle.created_at.elapsed() < self.config.max_lifetime
                && idle.idle_since.elapsed() < self.config.max_idle_time
            {
                tracing::trace!("reusing idle connection");
                self.active.fetch_add(1, Ordering::Relaxed);
                return Ok(PooledConn {
                    conn: Some(idle.conn),
                    created_at: idle.created_at,
                    _permit: permit,
                    pool: Arc::clone(self),
                });
            }
            tracing::trace!("closing expired idle connection");
            let _ = idle.conn.close().await;
        }

        match self.connector.connect().await {
            Ok(conn) => {
                self.active.fetch_add(1, Ordering::Relaxed);
                Ok(PooledConn {
                    conn: Some(conn),
                    created_at: Instant::now(),
                    _permit: permit,
                    pool: Arc::clone(self),
                })
            }
            // Dropping the permit releases the capacity slot.
            Err(source) => Err(PoolError::AcquisitionFailed { source }),
        }
    }

    /// Return a connection to the pool.
    ///
    /// Broken connections, connections past their lifetime, and overflow past
    /// `max_idle` are closed rather than retained.
    async fn release(&self, conn: Box<dyn Connection>, created_at: Instant, broken: bool) {
        self.active.fetch_sub(1, Ordering::Relaxed);

        let retire = broken
            || self.closed.load(Ordering::Acquire)
            || created_at.elapsed() >= self.config.max_lifetime;
        if retire {
            let _ = conn.close().await;
            return;
        }

        let overflow = {
            let mut idle = self.idle.lock();
            if idle.len() < self.config.max_idle as usize {
                idle.push_back(IdleConn {
                    conn,
                    created_at,
                    idle_since: Instant::now(),
                });
                None
            } else {
                Some(conn)
            }
        };
        if let Some(conn) = overflow {
            let _ = conn.close().await;
        }
    }

    /// Current occupancy.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            active: self.active.load(Ordering::Relaxed),
            idle: self.idle.lock().len() as u64,
            max_open: self.config.max_open,
        }
    }

    /// Whether the pool has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the pool: deny new acquisitions, wake waiters with
    /// [`PoolError::PoolClosed`], and close every idle connection.
    /// Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.semaphore.close();

        let drained: Vec<IdleConn> = {
            let mut idle = self.idle.lock();
            idle.drain(..).collect()
        };
        for idle in drained {
            let _ = idle.conn.close().await;
        }
        tracing::info!(server = %self.connector.describe(), "connection pool closed");
    }
}

/// A checked-out connection holding its pool capacity slot.
///
/// Explicitly release with [`release`](PooledConn::release); a dropped
/// handle discards the physical connection rather than returning it.
pub struct PooledConn {
    conn: Option<Box<dyn Connection>>,
    created_at: Instant,
    _permit: OwnedSemaphorePermit,
    pool: Arc<ConnectionPool>,
}

impl PooledConn {
    /// The underlying connection, until the handle is released.
    pub fn connection(&mut self) -> Option<&mut (dyn Connection + 'static)> {
        self.conn.as_deref_mut()
    }

    /// Return the connection to the pool; `broken` connections are closed
    /// instead of retained for reuse.
    pub async fn release(mut self, broken: bool) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, self.created_at, broken).await;
        }
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        // Backstop for handles that were never explicitly released: the
        // physical connection is discarded, which also aborts any open
        // transaction server-side.
        if self.conn.take().is_some() {
            self.pool.active.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!("discarding connection dropped without release");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use steadydb_backend::mock::MockConnector;

    use crate::config::Environment;

    fn test_config() -> PoolConfig {
        PoolConfig::for_environment(Environment::Development)
            .max_open(2)
            .max_idle(1)
    }

    #[tokio::test]
    async fn test_acquire_reuses_released_connection() {
        let connector = MockConnector::new();
        let pool = ConnectionPool::new(Arc::new(connector.clone()), test_config());

        let conn = pool.acquire().await.unwrap();
        conn.release(false).await;
        let conn = pool.acquire().await.unwrap();
        conn.release(false).await;

        assert_eq!(connector.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_broken_connection_not_reused() {
        let connector = MockConnector::new();
        let pool = ConnectionPool::new(Arc::new(connector.clone()), test_config());

        let conn = pool.acquire().await.unwrap();
        conn.release(true).await;
        let conn = pool.acquire().await.unwrap();
        conn.release(false).await;

        assert_eq!(connector.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_idle_overflow_is_closed() {
        let connector = MockConnector::new();
        let pool = ConnectionPool::new(Arc::new(connector.clone()), test_config());

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        first.release(false).await;
        second.release(false).await;

        // max_idle = 1: the second release had to close its connection.
        assert_eq!(pool.stats().idle, 1);
        assert_eq!(connector.open_connections(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_idle_connection_is_redialed() {
        let connector = MockConnector::new();
        let config = test_config().max_idle_time(Duration::from_secs(1));
        let pool = ConnectionPool::new(Arc::new(connector.clone()), config);

        let conn = pool.acquire().await.unwrap();
        conn.release(false).await;

        tokio::time::advance(Duration::from_secs(2)).await;

        let conn = pool.acquire().await.unwrap();
        conn.release(false).await;
        assert_eq!(connector.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_capacity_until_release() {
        let connector = MockConnector::new();
        let pool = ConnectionPool::new(Arc::new(connector.clone()), test_config().max_open(1).max_idle(1));

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|c| drop(c)) })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        held.release(false).await;
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_wakes_waiters_and_denies_acquire() {
        let connector = MockConnector::new();
        let pool = ConnectionPool::new(Arc::new(connector.clone()), test_config().max_open(1).max_idle(1));

        let held = pool.acquire().await.unwrap();
        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        tokio::task::yield_now().await;

        pool.close().await;
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
        assert!(matches!(pool.acquire().await, Err(PoolError::PoolClosed)));

        // Close is idempotent.
        pool.close().await;
        held.release(false).await;
        assert_eq!(connector.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_dial_failure_releases_capacity() {
        let connector = MockConnector::new();
        let pool = ConnectionPool::new(Arc::new(connector.clone()), test_config().max_open(1).max_idle(1));

        connector.fail_next_connects(1);
        assert!(matches!(
            pool.acquire().await,
            Err(PoolError::AcquisitionFailed { .. })
        ));

        // The failed dial did not consume the only permit.
        let conn = pool.acquire().await.unwrap();
        conn.release(false).await;
    }
}
