//! Filesystem-driven schema migrations.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use steadydb_backend::{Connection, Connector, Value};
use steadydb_pool::ConnectionError;

use crate::error::ServiceError;

const ENSURE_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (\
    filename TEXT PRIMARY KEY, \
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now())";

const LIST_APPLIED: &str = "SELECT filename FROM schema_migrations";

const RECORD_APPLIED: &str = "INSERT INTO schema_migrations (filename) VALUES ($1)";

/// Applies the `.sql` files in a directory, in filename order, each inside
/// its own transaction.
///
/// Applied filenames are recorded in a `schema_migrations` table, so each
/// file runs exactly once across service restarts. The first failure rolls
/// back that file's transaction and halts the run; later files are never
/// attempted.
pub struct MigrationRunner {
    dir: PathBuf,
}

impl MigrationRunner {
    /// Create a runner over `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Apply all pending migrations, returning the filenames applied in this
    /// run.
    ///
    /// A missing directory or an empty one is a successful no-op.
    pub async fn run(&self, connector: &dyn Connector) -> Result<Vec<String>, ServiceError> {
        let files = self.list_files()?;
        if files.is_empty() {
            tracing::info!(dir = %self.dir.display(), "no migration files, nothing to apply");
            return Ok(Vec::new());
        }

        let mut conn = connector.connect().await?;
        let outcome = apply_all(conn.as_mut(), &self.dir, &files).await;
        let _ = conn.close().await;

        match &outcome {
            Ok(applied) => {
                tracing::info!(
                    applied = applied.len(),
                    total = files.len(),
                    "migrations complete"
                );
            }
            Err(err) => tracing::error!(error = %err, "migration run halted"),
        }
        outcome
    }

    /// The `.sql` files in the directory, sorted by filename.
    fn list_files(&self) -> Result<Vec<String>, ServiceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir).map_err(|source| ServiceError::MigrationIo {
            path: self.dir.display().to_string(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ServiceError::MigrationIo {
                path: self.dir.display().to_string(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".sql") {
                files.push(name);
            }
        }
        files.sort();
        Ok(files)
    }
}

async fn apply_all(
    conn: &mut (dyn Connection + 'static),
    dir: &Path,
    files: &[String],
) -> Result<Vec<String>, ServiceError> {
    conn.execute(ENSURE_TABLE, &[]).await?;

    let already_applied: BTreeSet<String> = conn
        .query(LIST_APPLIED, &[])
        .await?
        .into_iter()
        .filter_map(|row| row.get("filename").and_then(Value::as_str).map(str::to_string))
        .collect();

    let mut applied = Vec::new();
    for file in files {
        if already_applied.contains(file) {
            tracing::debug!(file = %file, "migration already applied, skipping");
            continue;
        }

        let sql = std::fs::read_to_string(dir.join(file)).map_err(|source| {
            ServiceError::MigrationIo {
                path: dir.join(file).display().to_string(),
                source,
            }
        })?;

        if let Err(err) = apply_one(conn, file, &sql).await {
            // Best effort; the connection is discarded either way.
            let _ = conn.execute("ROLLBACK", &[]).await;
            return Err(ServiceError::Migration {
                file: file.clone(),
                source: ConnectionError::Backend(err),
            });
        }
        tracing::info!(file = %file, "migration applied");
        applied.push(file.clone());
    }
    Ok(applied)
}

async fn apply_one(
    conn: &mut (dyn Connection + 'static),
    file: &str,
    sql: &str,
) -> Result<(), steadydb_backend::BackendError> {
    conn.execute("BEGIN", &[]).await?;
    conn.execute_batch(sql).await?;
    conn.execute(RECORD_APPLIED, &[Value::Text(file.to_string())])
        .await?;
    conn.execute("COMMIT", &[]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use steadydb_backend::Row;
    use steadydb_backend::mock::MockConnector;

    fn write_migrations(dir: &Path, files: &[(&str, &str)]) {
        for (name, sql) in files {
            std::fs::write(dir.join(name), sql).unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_directory_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MockConnector::new();

        let applied = MigrationRunner::new(dir.path())
            .run(&connector)
            .await
            .unwrap();

        assert!(applied.is_empty());
        assert_eq!(connector.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn test_files_apply_in_filename_order_each_in_a_transaction() {
        let dir = tempfile::tempdir().unwrap();
        write_migrations(
            dir.path(),
            &[
                ("002_indexes.sql", "CREATE INDEX idx_orders ON orders (id)"),
                ("001_init.sql", "CREATE TABLE orders (id BIGINT)"),
                ("notes.txt", "not a migration"),
            ],
        );
        let connector = MockConnector::new();

        let applied = MigrationRunner::new(dir.path())
            .run(&connector)
            .await
            .unwrap();

        assert_eq!(applied, vec!["001_init.sql", "002_indexes.sql"]);
        assert_eq!(connector.begin_count(), 2);
        assert_eq!(connector.commit_count(), 2);

        let statements = connector.statements();
        let init_pos = statements
            .iter()
            .position(|s| s.contains("CREATE TABLE orders"))
            .unwrap();
        let index_pos = statements
            .iter()
            .position(|s| s.contains("CREATE INDEX idx_orders"))
            .unwrap();
        assert!(init_pos < index_pos);
    }

    #[tokio::test]
    async fn test_already_applied_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_migrations(
            dir.path(),
            &[
                ("001_init.sql", "CREATE TABLE orders (id BIGINT)"),
                ("002_indexes.sql", "CREATE INDEX idx_orders ON orders (id)"),
            ],
        );
        let connector = MockConnector::new();
        connector.queue_rows(vec![Row::new(
            vec!["filename".to_string()],
            vec![Value::Text("001_init.sql".to_string())],
        )]);

        let applied = MigrationRunner::new(dir.path())
            .run(&connector)
            .await
            .unwrap();

        assert_eq!(applied, vec!["002_indexes.sql"]);
        assert_eq!(connector.begin_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_halts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        write_migrations(
            dir.path(),
            &[
                ("001_init.sql", "CREATE TABLE orders (id BIGINT)"),
                ("002_bad.sql", "CREATE TABLE malformed"),
                ("003_later.sql", "CREATE TABLE never_reached (id BIGINT)"),
            ],
        );
        let connector = MockConnector::new();
        connector.fail_matching("malformed");

        let result = MigrationRunner::new(dir.path()).run(&connector).await;

        match result {
            Err(ServiceError::Migration { file, .. }) => assert_eq!(file, "002_bad.sql"),
            other => panic!("expected migration error, got {other:?}"),
        }
        assert_eq!(connector.commit_count(), 1);
        assert_eq!(connector.rollback_count(), 1);
        assert!(
            !connector
                .statements()
                .iter()
                .any(|s| s.contains("never_reached"))
        );
    }
}
