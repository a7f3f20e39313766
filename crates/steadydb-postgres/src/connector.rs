//! PostgreSQL connector and connection.

use async_trait::async_trait;
use sqlx::Connection as _;
use sqlx::postgres::PgConnection;

use steadydb_backend::{BackendError, Connection, Connector, Row, Value};

use crate::convert::{bind_params, pg_row_to_row};

/// A [`Connector`] that dials PostgreSQL with a connection URL.
pub struct PgConnector {
    url: String,
}

impl PgConnector {
    /// Create a connector for the given `postgres://` URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, BackendError> {
        let conn = PgConnection::connect(&self.url)
            .await
            .map_err(|e| BackendError::Connect(e.to_string()))?;
        tracing::debug!(server = %self.describe(), "postgres connection established");
        Ok(Box::new(PgBackendConnection { conn }))
    }

    fn describe(&self) -> String {
        redact_url(&self.url)
    }
}

/// One physical PostgreSQL connection.
pub struct PgBackendConnection {
    conn: PgConnection,
}

// The driver calls live in free functions taking `&mut PgConnection` at a
// concrete lifetime; calling sqlx through `&mut self.conn` directly inside
// the boxed trait futures trips a higher-ranked `Executor` bound.
#[async_trait]
impl Connection for PgBackendConnection {
    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, BackendError> {
        run_execute(&mut self.conn, sql, params).await
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, BackendError> {
        run_query(&mut self.conn, sql, params).await
    }

    async fn query_row(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Row>, BackendError> {
        run_query_row(&mut self.conn, sql, params).await
    }

    async fn execute_batch(&mut self, sql: &str) -> Result<(), BackendError> {
        run_batch(&mut self.conn, sql).await
    }

    async fn ping(&mut self) -> Result<(), BackendError> {
        self.conn
            .ping()
            .await
            .map_err(|e| BackendError::Query(e.to_string()))
    }

    async fn close(self: Box<Self>) -> Result<(), BackendError> {
        self.conn
            .close()
            .await
            .map_err(|e| BackendError::Query(e.to_string()))
    }
}

async fn run_execute(
    conn: &mut PgConnection,
    sql: &str,
    params: &[Value],
) -> Result<u64, BackendError> {
    let query = bind_params(sqlx::query(sql), params);
    let result = query
        .execute(conn)
        .await
        .map_err(|e| BackendError::Query(e.to_string()))?;
    Ok(result.rows_affected())
}

async fn run_query(
    conn: &mut PgConnection,
    sql: &str,
    params: &[Value],
) -> Result<Vec<Row>, BackendError> {
    let query = bind_params(sqlx::query(sql), params);
    let rows = query
        .fetch_all(conn)
        .await
        .map_err(|e| BackendError::Query(e.to_string()))?;
    rows.iter().map(pg_row_to_row).collect()
}

async fn run_query_row(
    conn: &mut PgConnection,
    sql: &str,
    params: &[Value],
) -> Result<Option<Row>, BackendError> {
    let query = bind_params(sqlx::query(sql), params);
    let row = query
        .fetch_optional(conn)
        .await
        .map_err(|e| BackendError::Query(e.to_string()))?;
    row.as_ref().map(pg_row_to_row).transpose()
}

async fn run_batch<'a>(conn: &'a mut PgConnection, sql: &'a str) -> Result<(), BackendError> {
    sqlx::Executor::execute(conn, sqlx::raw_sql(sql))
        .await
        .map_err(|e| BackendError::Query(e.to_string()))?;
    Ok(())
}

/// Strip the password from a connection URL for logging.
fn redact_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((userinfo, host)) = rest.split_once('@') else {
        return url.to_string();
    };
    match userinfo.split_once(':') {
        Some((user, _password)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_url_hides_password() {
        assert_eq!(
            redact_url("postgres://app:secret@db:5432/app"),
            "postgres://app:***@db:5432/app"
        );
    }

    #[test]
    fn test_redact_url_without_credentials() {
        assert_eq!(
            redact_url("postgres://db:5432/app"),
            "postgres://db:5432/app"
        );
    }
}
