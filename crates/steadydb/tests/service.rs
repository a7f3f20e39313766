//! End-to-end service lifecycle tests over the mock backend.

use std::sync::Arc;

use steadydb::{
    DatabaseConfig, DatabaseService, Environment, ServiceError, TransactionOptions, Value,
};
use steadydb_backend::mock::MockConnector;

fn config_with_migrations(dir: &std::path::Path) -> DatabaseConfig {
    DatabaseConfig {
        url: "postgres://app@localhost:5432/app".to_string(),
        environment: Environment::Development,
        migrations_dir: dir.to_path_buf(),
    }
}

#[tokio::test]
async fn test_full_lifecycle_migrate_transact_close() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("001_init.sql"),
        "CREATE TABLE orders (id BIGINT PRIMARY KEY)",
    )
    .unwrap();

    let connector = MockConnector::new();
    let service = DatabaseService::initialize(
        Arc::new(connector.clone()),
        config_with_migrations(dir.path()),
    )
    .await;
    assert!(service.is_enhanced());

    let applied = service.run_migrations().await.unwrap();
    assert_eq!(applied, vec!["001_init.sql"]);

    let mut conn = service.get_connection().await.unwrap();
    conn.with_transaction(TransactionOptions::new(), |tx| {
        Box::pin(async move {
            tx.execute(
                "INSERT INTO orders (id) VALUES ($1)",
                &[Value::Int(1)],
            )
            .await?;
            Ok(())
        })
    })
    .await
    .unwrap();
    conn.close().await;

    // Migration transaction plus the request transaction.
    assert_eq!(connector.commit_count(), 2);
    assert_eq!(connector.rollback_count(), 0);

    service.close().await.unwrap();
    assert_eq!(connector.open_connections(), 0);
}

#[tokio::test]
async fn test_second_run_applies_nothing_new() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("001_init.sql"), "CREATE TABLE t (id BIGINT)").unwrap();

    let connector = MockConnector::new();
    let service = DatabaseService::initialize(
        Arc::new(connector.clone()),
        config_with_migrations(dir.path()),
    )
    .await;

    let applied = service.run_migrations().await.unwrap();
    assert_eq!(applied.len(), 1);

    // The second run sees the filename already recorded.
    connector.queue_rows(vec![steadydb::Row::new(
        vec!["filename".to_string()],
        vec![Value::Text("001_init.sql".to_string())],
    )]);
    let applied = service.run_migrations().await.unwrap();
    assert!(applied.is_empty());

    service.close().await.unwrap();
}

#[tokio::test]
async fn test_fallback_mode_supports_standard_queries_only() {
    let dir = tempfile::tempdir().unwrap();
    let connector = MockConnector::new();
    // The initial probe fails, fixing the service in fallback mode.
    connector.fail_next_connects(1);

    let service = DatabaseService::initialize(
        Arc::new(connector.clone()),
        config_with_migrations(dir.path()),
    )
    .await;
    assert!(!service.is_enhanced());

    assert!(matches!(
        service.get_connection().await,
        Err(ServiceError::UnsupportedOperation { .. })
    ));

    let rows = service
        .standard()
        .query("SELECT id FROM orders", &[])
        .await
        .unwrap();
    assert!(rows.is_empty());

    // Mode is fixed at initialization: the store recovering does not
    // switch the service back to enhanced mode.
    service.standard().probe().await.unwrap();
    assert!(!service.is_enhanced());

    let health = service.health().await;
    assert_eq!(health.get("status").map(String::as_str), Some("degraded"));
    service.close().await.unwrap();
}

#[tokio::test]
async fn test_health_reports_breaker_trips_when_unhealthy() {
    let dir = tempfile::tempdir().unwrap();
    let connector = MockConnector::new();
    let service = DatabaseService::initialize(
        Arc::new(connector.clone()),
        config_with_migrations(dir.path()),
    )
    .await;
    assert!(service.is_enhanced());

    // Hold the pooled connection left by the initial probe so every further
    // acquisition has to dial, then fail those dials until the breaker opens.
    let mut held = service.get_connection().await.unwrap();
    connector.fail_next_connects(100);
    loop {
        match service.get_connection().await {
            Err(ServiceError::Pool(steadydb::PoolError::CircuitOpen)) => break,
            Err(_) => {}
            Ok(mut conn) => conn.close().await,
        }
    }
    held.close().await;

    let health = service.health().await;
    assert_eq!(health.get("mode").map(String::as_str), Some("enhanced"));
    // The breaker opened between health-check cycles, so the report must
    // reflect its live state even though the last probe passed.
    assert_eq!(health.get("status").map(String::as_str), Some("unhealthy"));
    assert_eq!(
        health.get("message").map(String::as_str),
        Some("circuit breaker triggered")
    );
    assert_ne!(
        health.get("circuit_breaker_trips").map(String::as_str),
        Some("0")
    );
    service.close().await.unwrap();
}
