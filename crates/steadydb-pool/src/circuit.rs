//! Circuit breaker: failure isolation for the backing store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation; all calls allowed.
    Closed,
    /// Too many consecutive failures; calls denied until the open timeout
    /// elapses.
    Open,
    /// Open timeout elapsed; trial operations allowed to test recovery.
    HalfOpen,
}

struct BreakerInner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
}

/// Tracks consecutive failures and gates whether new operations against the
/// backing store may be attempted.
///
/// All state lives behind a single mutex so two callers racing through
/// [`can_execute`](CircuitBreaker::can_execute) can never both consume a
/// stale allow/deny decision; the Open to Half-Open transition happens
/// exactly once per open window.
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    threshold: u32,
    open_timeout: Duration,
    trips: AtomicU64,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `threshold` consecutive failures and
    /// allows a trial operation `open_timeout` after the last failure.
    #[must_use]
    pub fn new(threshold: u32, open_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
            }),
            threshold,
            open_timeout,
            trips: AtomicU64::new(0),
        }
    }

    /// Whether a new operation may be attempted.
    ///
    /// Closed and Half-Open allow the call. Open denies it until the open
    /// timeout has elapsed since the last failure, at which point the breaker
    /// transitions to Half-Open (as a side effect, under the lock) and allows
    /// trial operations.
    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match inner.last_failure {
                Some(at) if at.elapsed() >= self.open_timeout => {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!("circuit breaker half-open, allowing trial operation");
                    true
                }
                _ => false,
            },
        }
    }

    /// Record a successful operation: resets the failure count and forces
    /// the breaker Closed from any state.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            tracing::info!("circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
    }

    /// Record a failed operation.
    ///
    /// Reaching the failure threshold transitions the breaker to Open and
    /// increments the trip counter. A failure while already Open refreshes
    /// the open window.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());

        if inner.failures >= self.threshold && inner.state != CircuitState::Open {
            inner.state = CircuitState::Open;
            self.trips.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                failures = inner.failures,
                threshold = self.threshold,
                "circuit breaker opened"
            );
        }
    }

    /// Current state (Open does not lazily transition here; only
    /// [`can_execute`](CircuitBreaker::can_execute) performs the Half-Open
    /// transition).
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures since the last success.
    #[must_use]
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failures
    }

    /// How many times the breaker has tripped open.
    #[must_use]
    pub fn trip_count(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }
}
