//! Background health monitoring and breaker recovery.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, timeout};
use tokio_util::sync::CancellationToken;

use steadydb_backend::Connector;

use crate::circuit::{CircuitBreaker, CircuitState};
use crate::error::HealthCheckError;
use crate::metrics::PoolMetrics;

/// Bound on each probe stage (connect+ping, then the query probe).
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Probe latency above this is logged as a warning (never a failure).
const SLOW_PROBE_THRESHOLD: Duration = Duration::from_secs(1);

/// Delay before the recovery probe that follows a failed cycle while the
/// breaker is open.
const RECOVERY_BACKOFF: Duration = Duration::from_secs(5);

/// Outcome of one probe cycle. Only the healthy flag and timestamp are
/// retained (in [`PoolMetrics`]); the rest is for logging.
#[derive(Debug)]
pub struct HealthCheckResult {
    /// Whether both probe stages passed.
    pub healthy: bool,
    /// When the probe finished.
    pub checked_at: SystemTime,
    /// How long the probe took.
    pub latency: Duration,
    /// The failure, when unhealthy.
    pub error: Option<HealthCheckError>,
}

/// Periodically probes the backing store, updating shared health state and
/// feeding the circuit breaker.
///
/// Probe failures are never fatal: they mark the pool unhealthy and record a
/// breaker failure. While the breaker is open, each failed cycle also
/// schedules a single recovery probe after a fixed backoff; a successful
/// recovery probe closes the breaker via
/// [`CircuitBreaker::record_success`].
pub struct HealthChecker {
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthChecker {
    /// Spawn the checker loop. It runs until `token` is cancelled.
    #[must_use]
    pub fn spawn(
        connector: Arc<dyn Connector>,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<PoolMetrics>,
        interval: Duration,
        token: CancellationToken,
    ) -> Self {
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            run_loop(connector, breaker, metrics, interval, loop_token).await;
        });
        Self {
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stop the checker and wait for the loop task to finish.
    ///
    /// The stop signal is a cancellation token, so repeated stops are
    /// harmless; only the first call has a task to await.
    pub async fn stop(&self) {
        self.token.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "health checker task panicked");
            }
        }
    }
}

async fn run_loop(
    connector: Arc<dyn Connector>,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<PoolMetrics>,
    interval: Duration,
    token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Consume the immediate first tick so the store has a full interval to
    // come up before the first verdict.
    ticker.tick().await;

    tracing::debug!(interval = ?interval, "health checker started");
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = run_cycle(connector.as_ref()).await;
        metrics.set_health(result.healthy);

        if result.healthy {
            if result.latency > SLOW_PROBE_THRESHOLD {
                tracing::warn!(latency = ?result.latency, "slow health check response");
            } else {
                tracing::debug!(latency = ?result.latency, "health check passed");
            }
        } else {
            if let Some(err) = &result.error {
                tracing::warn!(error = %err, "health check failed");
            }
            breaker.record_failure();

            if breaker.state() == CircuitState::Open {
                spawn_recovery_probe(
                    Arc::clone(&connector),
                    Arc::clone(&breaker),
                    token.clone(),
                );
            }
        }
    }
    tracing::debug!("health checker stopped");
}

async fn run_cycle(connector: &dyn Connector) -> HealthCheckResult {
    let started = Instant::now();
    let outcome = probe(connector).await;
    HealthCheckResult {
        healthy: outcome.is_ok(),
        checked_at: SystemTime::now(),
        latency: started.elapsed(),
        error: outcome.err(),
    }
}

/// Two-stage probe: basic connectivity (connect + ping), then a trivial
/// read-only query. Each stage is bounded by [`PROBE_TIMEOUT`].
async fn probe(connector: &dyn Connector) -> Result<(), HealthCheckError> {
    let mut conn = timeout(PROBE_TIMEOUT, async {
        let mut conn = connector.connect().await?;
        conn.ping().await?;
        Ok::<_, HealthCheckError>(conn)
    })
    .await
    .map_err(|_| HealthCheckError::Timeout {
        timeout: PROBE_TIMEOUT,
    })??;

    let query_result = timeout(PROBE_TIMEOUT, conn.query_row("SELECT 1", &[]))
        .await
        .map_err(|_| HealthCheckError::Timeout {
            timeout: PROBE_TIMEOUT,
        });

    let _ = conn.close().await;
    query_result?.map_err(HealthCheckError::from)?;
    Ok(())
}

/// One-shot recovery attempt after a backoff. Success closes the breaker;
/// failure is logged and left for the next scheduled cycle.
fn spawn_recovery_probe(
    connector: Arc<dyn Connector>,
    breaker: Arc<CircuitBreaker>,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => return,
            () = tokio::time::sleep(RECOVERY_BACKOFF) => {}
        }

        match probe(connector.as_ref()).await {
            Ok(()) => {
                breaker.record_success();
                tracing::info!("recovery probe succeeded, circuit breaker closed");
            }
            Err(err) => {
                tracing::warn!(error = %err, "recovery probe failed");
            }
        }
    });
}
