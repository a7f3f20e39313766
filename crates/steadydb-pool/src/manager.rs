//! The pool manager: the primary connection acquisition point.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;

use steadydb_backend::Connector;

use crate::circuit::CircuitBreaker;
use crate::config::PoolConfig;
use crate::connection::RequestConnection;
use crate::error::PoolError;
use crate::health::HealthChecker;
use crate::metrics::{MetricsSnapshot, PoolMetrics};
use crate::pool::ConnectionPool;

/// Warn when open connections exceed this share of `max_open`.
const HIGH_UTILIZATION: f64 = 0.8;

/// Warn when the cumulative acquisition-wait count passes this mark.
const WAIT_HIGH_WATER: u64 = 1_000;

/// Composes the connection pool, circuit breaker, metrics, and health
/// checker into one acquisition point.
///
/// Construct once at process start and share by reference; there is no
/// global instance.
pub struct PoolManager {
    pool: Arc<ConnectionPool>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<PoolMetrics>,
    config: PoolConfig,
    health: HealthChecker,
    token: CancellationToken,
    metrics_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PoolManager {
    /// Validate `config` and start the manager, including both background
    /// loops (health checks and metrics collection).
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;

        let pool = ConnectionPool::new(Arc::clone(&connector), config.clone());
        let breaker = Arc::new(CircuitBreaker::new(
            config.failure_threshold,
            config.open_timeout,
        ));
        let metrics = Arc::new(PoolMetrics::new());
        let token = CancellationToken::new();

        let health = HealthChecker::spawn(
            Arc::clone(&connector),
            Arc::clone(&breaker),
            Arc::clone(&metrics),
            config.health_check_interval,
            token.child_token(),
        );

        let metrics_task = tokio::spawn(metrics_loop(
            Arc::clone(&pool),
            Arc::clone(&metrics),
            config.clone(),
            token.child_token(),
        ));

        tracing::info!(
            environment = %config.environment,
            max_open = config.max_open,
            max_idle = config.max_idle,
            server = %connector.describe(),
            "pool manager started"
        );

        Ok(Self {
            pool,
            breaker,
            metrics,
            config,
            health,
            token,
            metrics_task: Mutex::new(Some(metrics_task)),
            closed: AtomicBool::new(false),
        })
    }

    /// Acquire a request-scoped connection.
    ///
    /// Fails with [`PoolError::PoolClosed`] after shutdown and with
    /// [`PoolError::CircuitOpen`] (before any I/O) while the breaker denies
    /// traffic. Acquisition is bounded by the configured timeout; the wait is
    /// recorded whether it succeeds or not, and the outcome feeds the
    /// breaker.
    pub async fn get_connection(&self) -> Result<RequestConnection, PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::PoolClosed);
        }
        if !self.breaker.can_execute() {
            return Err(PoolError::CircuitOpen);
        }

        let started = Instant::now();
        let outcome = timeout(self.config.acquire_timeout, self.pool.acquire()).await;
        self.metrics.record_wait(started.elapsed());

        match outcome {
            Ok(Ok(handle)) => {
                self.breaker.record_success();
                self.metrics.record_issued();
                self.refresh_gauges();
                Ok(RequestConnection::new(handle, self.config.query_timeout))
            }
            Ok(Err(PoolError::PoolClosed)) => Err(PoolError::PoolClosed),
            Ok(Err(err)) => {
                self.breaker.record_failure();
                self.metrics.record_failed();
                tracing::warn!(error = %err, "connection acquisition failed");
                Err(err)
            }
            Err(_) => {
                self.breaker.record_failure();
                self.metrics.record_failed();
                let timeout = self.config.acquire_timeout;
                tracing::warn!(timeout = ?timeout, "connection acquisition timed out");
                Err(PoolError::AcquisitionTimeout { timeout })
            }
        }
    }

    /// Point-in-time metrics snapshot; safe for concurrent readers.
    #[must_use]
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.refresh_gauges();
        self.metrics.snapshot(self.breaker.trip_count())
    }

    /// Last health-check verdict (non-blocking).
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.metrics.is_healthy()
    }

    /// Record the outcome of an out-of-band probe, ahead of the first
    /// scheduled health-check cycle.
    pub fn record_health(&self, healthy: bool) {
        self.metrics.set_health(healthy);
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The circuit breaker, for health reporting.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Shut down: stop both background loops, then close the pool.
    ///
    /// Idempotent; a second call logs a warning and returns `Ok`.
    pub async fn close(&self) -> Result<(), PoolError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::warn!("pool manager close called more than once");
            return Ok(());
        }

        self.token.cancel();
        self.health.stop().await;
        let metrics_task = self.metrics_task.lock().take();
        if let Some(task) = metrics_task {
            if let Err(err) = task.await {
                tracing::error!(error = %err, "metrics task panicked");
            }
        }
        self.pool.close().await;
        tracing::info!("pool manager closed");
        Ok(())
    }

    fn refresh_gauges(&self) {
        let stats = self.pool.stats();
        self.metrics.set_gauges(stats.active, stats.idle);
    }
}

/// Periodic gauge refresh plus utilization warnings. Observability only;
/// never blocks the request path.
async fn metrics_loop(
    pool: Arc<ConnectionPool>,
    metrics: Arc<PoolMetrics>,
    config: PoolConfig,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.metrics_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let stats = pool.stats();
        metrics.set_gauges(stats.active, stats.idle);

        let open = stats.active + stats.idle;
        if (open as f64) > f64::from(config.max_open) * HIGH_UTILIZATION {
            tracing::warn!(
                open,
                max_open = config.max_open,
                "open connections above 80% of maximum"
            );
        }
        if metrics.wait_count() > WAIT_HIGH_WATER {
            tracing::warn!(
                wait_count = metrics.wait_count(),
                "acquisition wait count past high-water mark"
            );
        }
    }
    tracing::debug!("metrics collector stopped");
}
