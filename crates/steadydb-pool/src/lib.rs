//! # steadydb-pool
//!
//! Resilient connection pooling for a relational backing store.
//!
//! The crate composes four cooperating pieces behind one acquisition point,
//! the [`PoolManager`]:
//!
//! - a bounded [`ConnectionPool`] that owns the physical connections;
//! - a [`CircuitBreaker`] that stops dialing a degraded store;
//! - a background [`HealthChecker`] that probes the store and drives
//!   breaker recovery;
//! - [`RequestConnection`], a single-use handle with a strict transaction
//!   lifecycle (no double commit, no silent transaction leak).
//!
//! ## Example
//!
//! ```rust,ignore
//! use steadydb_pool::{Environment, PoolConfig, PoolManager};
//!
//! let config = PoolConfig::for_environment(Environment::Production);
//! let manager = PoolManager::new(connector, config)?;
//!
//! let mut conn = manager.get_connection().await?;
//! conn.with_transaction(Default::default(), |tx| {
//!     Box::pin(async move {
//!         tx.execute("UPDATE accounts SET balance = balance - 10", &[])
//!             .await?;
//!         Ok(())
//!     })
//! })
//! .await?;
//! conn.close().await;
//!
//! manager.close().await?;
//! ```

pub mod circuit;
pub mod config;
pub mod connection;
pub mod error;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod pool;

// Configuration
pub use config::{Environment, PoolConfig};

// Error types
pub use error::{ConnectionError, HealthCheckError, PoolError, TransactionError};

// Circuit breaker
pub use circuit::{CircuitBreaker, CircuitState};

// Pool types
pub use pool::{ConnectionPool, PoolStats, PooledConn};

// Metrics
pub use metrics::{MetricsSnapshot, PoolMetrics};

// Health monitoring
pub use health::{HealthCheckResult, HealthChecker};

// Acquisition point and request-scoped handle
pub use connection::RequestConnection;
pub use manager::PoolManager;
