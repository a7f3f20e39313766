//! The database service facade.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use steadydb_backend::Connector;
use steadydb_pool::{CircuitState, PoolManager, RequestConnection};

use crate::config::DatabaseConfig;
use crate::error::ServiceError;
use crate::migrate::MigrationRunner;
use crate::standard::{PooledStandardAdapter, StandardDb, StandardManager};

/// Share of `max_open` above which health reporting flags high usage.
const HIGH_USAGE: f64 = 0.8;

enum ServiceMode {
    /// Pooled access with circuit breaking and health monitoring.
    Enhanced {
        manager: Arc<PoolManager>,
        standard: PooledStandardAdapter,
    },
    /// Connect-per-operation access; taken when the pool cannot start.
    Fallback { manager: StandardManager },
}

/// Application-facing entry point for database access.
///
/// The service picks its mode once, at [`initialize`](Self::initialize):
/// enhanced (pooled) when the pool starts and an initial probe succeeds,
/// fallback (standard, connect-per-operation) otherwise. The mode is never
/// re-evaluated afterwards.
pub struct DatabaseService {
    connector: Arc<dyn Connector>,
    config: DatabaseConfig,
    mode: ServiceMode,
}

impl DatabaseService {
    /// Start the service over `connector`.
    ///
    /// Tries to start the pool manager and verify connectivity with one
    /// probe query; any failure is logged and the service falls back to
    /// standard mode rather than failing startup.
    pub async fn initialize(connector: Arc<dyn Connector>, config: DatabaseConfig) -> Self {
        let pool_config = config.pool_config();
        let query_timeout = pool_config.query_timeout;

        let mode = match PoolManager::new(Arc::clone(&connector), pool_config) {
            Ok(manager) => {
                let manager = Arc::new(manager);
                match initial_probe(&manager).await {
                    Ok(()) => {
                        manager.record_health(true);
                        tracing::info!(environment = %config.environment, "database service started in enhanced mode");
                        ServiceMode::Enhanced {
                            standard: PooledStandardAdapter::new(Arc::clone(&manager)),
                            manager,
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "initial probe failed, falling back to standard mode");
                        if let Err(err) = manager.close().await {
                            tracing::warn!(error = %err, "failed to close pool manager after probe failure");
                        }
                        ServiceMode::Fallback {
                            manager: StandardManager::new(Arc::clone(&connector), query_timeout),
                        }
                    }
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "pool manager unavailable, falling back to standard mode");
                ServiceMode::Fallback {
                    manager: StandardManager::new(Arc::clone(&connector), query_timeout),
                }
            }
        };

        Self {
            connector,
            config,
            mode,
        }
    }

    /// Whether the service is running in enhanced (pooled) mode.
    #[must_use]
    pub fn is_enhanced(&self) -> bool {
        matches!(self.mode, ServiceMode::Enhanced { .. })
    }

    /// The active mode, for logs and health output.
    #[must_use]
    pub fn mode_name(&self) -> &'static str {
        match self.mode {
            ServiceMode::Enhanced { .. } => "enhanced",
            ServiceMode::Fallback { .. } => "fallback",
        }
    }

    /// Acquire a request-scoped connection with transaction support.
    ///
    /// Only available in enhanced mode; fallback mode returns
    /// [`ServiceError::UnsupportedOperation`] (use
    /// [`standard`](Self::standard) there).
    pub async fn get_connection(&self) -> Result<RequestConnection, ServiceError> {
        match &self.mode {
            ServiceMode::Enhanced { manager, .. } => Ok(manager.get_connection().await?),
            ServiceMode::Fallback { .. } => Err(ServiceError::UnsupportedOperation {
                mode: "fallback",
                operation: "get_connection",
            }),
        }
    }

    /// The simple-query surface, available in both modes.
    #[must_use]
    pub fn standard(&self) -> &dyn StandardDb {
        match &self.mode {
            ServiceMode::Enhanced { standard, .. } => standard,
            ServiceMode::Fallback { manager } => manager,
        }
    }

    /// Flat health report for surfacing over an admin endpoint.
    pub async fn health(&self) -> BTreeMap<String, String> {
        let mut report = BTreeMap::new();
        report.insert("mode".to_string(), self.mode_name().to_string());
        report.insert(
            "environment".to_string(),
            self.config.environment.to_string(),
        );

        match &self.mode {
            ServiceMode::Enhanced { manager, .. } => {
                let snapshot = manager.get_metrics();
                let max_open = manager.config().max_open;
                let open = snapshot.active_connections + snapshot.idle_connections;
                let high_usage = (open as f64) > f64::from(max_open) * HIGH_USAGE;
                // The breaker can open between health-check cycles (repeated
                // acquisition failures), so its live state outranks the last
                // probe verdict.
                let breaker_open = manager.breaker().state() == CircuitState::Open;
                let healthy = snapshot.healthy && !breaker_open;

                let message = if breaker_open {
                    "circuit breaker triggered"
                } else if high_usage {
                    "high connection usage"
                } else if snapshot.healthy {
                    "healthy"
                } else {
                    "health check failing"
                };

                report.insert(
                    "status".to_string(),
                    if healthy { "healthy" } else { "unhealthy" }.to_string(),
                );
                report.insert("message".to_string(), message.to_string());
                report.insert(
                    "active_connections".to_string(),
                    snapshot.active_connections.to_string(),
                );
                report.insert(
                    "idle_connections".to_string(),
                    snapshot.idle_connections.to_string(),
                );
                report.insert(
                    "total_connections".to_string(),
                    snapshot.total_connections.to_string(),
                );
                report.insert(
                    "failed_acquisitions".to_string(),
                    snapshot.failed_acquisitions.to_string(),
                );
                report.insert(
                    "circuit_breaker_trips".to_string(),
                    snapshot.circuit_breaker_trips.to_string(),
                );
                report.insert("wait_count".to_string(), snapshot.wait_count.to_string());
                report.insert(
                    "last_health_check".to_string(),
                    format_check_time(snapshot.last_health_check_ms),
                );
            }
            ServiceMode::Fallback { manager } => match manager.probe().await {
                Ok(()) => {
                    report.insert("status".to_string(), "degraded".to_string());
                    report.insert(
                        "message".to_string(),
                        "running without connection pooling".to_string(),
                    );
                }
                Err(err) => {
                    report.insert("status".to_string(), "unhealthy".to_string());
                    report.insert("message".to_string(), err.to_string());
                }
            },
        }
        report
    }

    /// Apply pending schema migrations from the configured directory.
    pub async fn run_migrations(&self) -> Result<Vec<String>, ServiceError> {
        MigrationRunner::new(&self.config.migrations_dir)
            .run(self.connector.as_ref())
            .await
    }

    /// Shut the service down.
    ///
    /// Every failed shutdown step is retained and reported together in
    /// [`ServiceError::CloseFailed`].
    pub async fn close(&self) -> Result<(), ServiceError> {
        let mut failures = Vec::new();
        if let ServiceMode::Enhanced { manager, .. } = &self.mode {
            if let Err(err) = manager.close().await {
                failures.push(format!("pool manager: {err}"));
            }
        }
        if failures.is_empty() {
            tracing::info!(mode = self.mode_name(), "database service closed");
            Ok(())
        } else {
            Err(ServiceError::CloseFailed(failures))
        }
    }
}

async fn initial_probe(manager: &PoolManager) -> Result<(), ServiceError> {
    let mut conn = manager.get_connection().await?;
    let result = conn.query_row("SELECT 1", &[]).await;
    conn.close().await;
    result?;
    Ok(())
}

fn format_check_time(epoch_ms: u64) -> String {
    if epoch_ms == 0 {
        return "never".to_string();
    }
    i64::try_from(epoch_ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map_or_else(|| "never".to_string(), |at| at.to_rfc3339())
}
