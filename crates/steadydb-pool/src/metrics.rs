//! Pool metrics: lock-free counters with point-in-time snapshots.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Shared pool counters.
///
/// Counters are monotonically non-decreasing except `active`/`idle`, which
/// are gauges reflecting current pool state. All mutation is through atomic
/// operations; callers never hold a lock to read.
#[derive(Default)]
pub struct PoolMetrics {
    total_connections: AtomicU64,
    active: AtomicU64,
    idle: AtomicU64,
    wait_count: AtomicU64,
    wait_nanos: AtomicU64,
    failed_acquisitions: AtomicU64,
    last_health_check_ms: AtomicU64,
    healthy: AtomicBool,
}

impl PoolMetrics {
    /// Create zeroed metrics (initially reported unhealthy until the first
    /// probe passes).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one issued connection.
    pub fn record_issued(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one acquisition wait.
    pub fn record_wait(&self, waited: Duration) {
        self.wait_count.fetch_add(1, Ordering::Relaxed);
        self.wait_nanos
            .fetch_add(waited.as_nanos().min(u128::from(u64::MAX)) as u64, Ordering::Relaxed);
    }

    /// Record one failed acquisition.
    pub fn record_failed(&self) {
        self.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    /// Refresh the active/idle gauges.
    pub fn set_gauges(&self, active: u64, idle: u64) {
        self.active.store(active, Ordering::Relaxed);
        self.idle.store(idle, Ordering::Relaxed);
    }

    /// Record the outcome of a health probe.
    pub fn set_health(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
            .unwrap_or(0);
        self.last_health_check_ms.store(now_ms, Ordering::Relaxed);
    }

    /// Last recorded health state (non-blocking).
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Cumulative acquisition waits.
    #[must_use]
    pub fn wait_count(&self) -> u64 {
        self.wait_count.load(Ordering::Relaxed)
    }

    /// Point-in-time snapshot, safe for concurrent readers.
    ///
    /// The breaker trip count lives with the breaker; the manager passes it
    /// in when composing the snapshot.
    #[must_use]
    pub fn snapshot(&self, circuit_breaker_trips: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active.load(Ordering::Relaxed),
            idle_connections: self.idle.load(Ordering::Relaxed),
            wait_count: self.wait_count.load(Ordering::Relaxed),
            wait_duration: Duration::from_nanos(self.wait_nanos.load(Ordering::Relaxed)),
            failed_acquisitions: self.failed_acquisitions.load(Ordering::Relaxed),
            circuit_breaker_trips,
            last_health_check_ms: self.last_health_check_ms.load(Ordering::Relaxed),
            healthy: self.healthy.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of [`PoolMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Total connections issued since startup.
    pub total_connections: u64,
    /// Connections currently checked out.
    pub active_connections: u64,
    /// Connections currently idle in the pool.
    pub idle_connections: u64,
    /// Cumulative acquisition waits.
    pub wait_count: u64,
    /// Cumulative time spent waiting for acquisitions.
    pub wait_duration: Duration,
    /// Acquisitions that failed (timeout or connect error).
    pub failed_acquisitions: u64,
    /// Times the circuit breaker has tripped open.
    pub circuit_breaker_trips: u64,
    /// Unix milliseconds of the last health probe (0 before the first).
    pub last_health_check_ms: u64,
    /// Last recorded health state.
    pub healthy: bool,
}
