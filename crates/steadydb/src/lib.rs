//! # steadydb
//!
//! Resilient database access layer: a pooled service facade with circuit
//! breaking, background health checks, request-scoped transactions, schema
//! migrations, and a standard (connect-per-operation) fallback mode.
//!
//! The [`DatabaseService`] is the application entry point. It starts in
//! enhanced mode when the pool comes up and an initial probe succeeds, and
//! falls back to standard mode otherwise; the mode is fixed for the life of
//! the service.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use steadydb::{DatabaseConfig, DatabaseService, PgConnector};
//!
//! let config = DatabaseConfig::from_env()?;
//! let connector = Arc::new(PgConnector::new(config.url.clone()));
//! let service = DatabaseService::initialize(connector, config).await;
//!
//! service.run_migrations().await?;
//!
//! let mut conn = service.get_connection().await?;
//! let row = conn.query_row("SELECT count(*) FROM orders", &[]).await?;
//! conn.close().await;
//!
//! service.close().await?;
//! ```

pub mod config;
pub mod error;
pub mod migrate;
pub mod service;
pub mod standard;

pub use config::DatabaseConfig;
pub use error::ServiceError;
pub use migrate::MigrationRunner;
pub use service::DatabaseService;
pub use standard::{PooledStandardAdapter, StandardDb, StandardManager};

// The pieces callers need from the layers below.
pub use steadydb_backend::{
    BackendError, Connection, Connector, IsolationLevel, Row, TransactionOptions, Value,
};
pub use steadydb_pool::{
    ConnectionError, Environment, MetricsSnapshot, PoolConfig, PoolError, PoolManager,
    RequestConnection, TransactionError,
};
pub use steadydb_postgres::PgConnector;
