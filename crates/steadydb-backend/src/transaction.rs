//! Transaction options and isolation levels.

use std::time::Duration;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Read uncommitted (dirty reads allowed).
    ReadUncommitted,
    /// Read committed (the common default).
    #[default]
    ReadCommitted,
    /// Repeatable read.
    RepeatableRead,
    /// Serializable (highest isolation).
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL statement to set this isolation level on the current
    /// transaction.
    #[must_use]
    pub fn as_set_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED",
            Self::ReadCommitted => "SET TRANSACTION ISOLATION LEVEL READ COMMITTED",
            Self::RepeatableRead => "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ",
            Self::Serializable => "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE",
        }
    }
}

/// Options for beginning a transaction.
///
/// ```rust
/// use std::time::Duration;
/// use steadydb_backend::{IsolationLevel, TransactionOptions};
///
/// let opts = TransactionOptions::new()
///     .isolation(IsolationLevel::Serializable)
///     .read_only(true)
///     .timeout(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Default)]
pub struct TransactionOptions {
    /// Isolation level override; `None` uses the session default.
    pub isolation: Option<IsolationLevel>,
    /// Whether the transaction is read-only.
    pub read_only: bool,
    /// Bound on the whole transaction, from begin to commit/rollback.
    pub timeout: Option<Duration>,
}

impl TransactionOptions {
    /// Create options with all defaults (session isolation, read-write,
    /// no transaction timeout).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    #[must_use]
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    /// Mark the transaction read-only.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Bound the whole transaction with a timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_sql() {
        assert_eq!(
            IsolationLevel::Serializable.as_set_sql(),
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        );
        assert_eq!(
            IsolationLevel::default().as_set_sql(),
            "SET TRANSACTION ISOLATION LEVEL READ COMMITTED"
        );
    }

    #[test]
    fn test_options_builder() {
        let opts = TransactionOptions::new()
            .isolation(IsolationLevel::RepeatableRead)
            .read_only(true)
            .timeout(Duration::from_secs(5));

        assert_eq!(opts.isolation, Some(IsolationLevel::RepeatableRead));
        assert!(opts.read_only);
        assert_eq!(opts.timeout, Some(Duration::from_secs(5)));
    }
}
