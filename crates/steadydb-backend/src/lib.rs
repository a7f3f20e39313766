//! # steadydb-backend
//!
//! The backend seam for the steadydb access layer.
//!
//! The pool, health checker, and service facade are written against the
//! object-safe [`Connector`] and [`Connection`] traits defined here, so they
//! work unchanged over any relational backing store. The crate also ships a
//! scriptable in-memory [`mock`] backend used throughout the workspace's
//! tests.
//!
//! ## Example
//!
//! ```rust,ignore
//! use steadydb_backend::{Connector, Value};
//!
//! let mut conn = connector.connect().await?;
//! let rows = conn
//!     .query("SELECT name FROM users WHERE id = $1", &[Value::Int(1)])
//!     .await?;
//! ```

pub mod connection;
pub mod error;
pub mod mock;
pub mod transaction;
pub mod value;

// Backend seam
pub use connection::{Connection, Connector};

// Error types
pub use error::BackendError;

// Transaction options
pub use transaction::{IsolationLevel, TransactionOptions};

// Scalar and row types
pub use value::{Row, Value};
