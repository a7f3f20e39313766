//! Environment-derived pool configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PoolError;

/// Deployment environment tag.
///
/// Each environment maps to a sizing preset via
/// [`PoolConfig::for_environment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Production sizing: largest pool, longest lifetimes.
    Production,
    /// Staging sizing: mid-size pool.
    Staging,
    /// Development sizing: small pool, short timeouts.
    #[default]
    Development,
}

impl Environment {
    /// Read the environment from the `APP_ENV` variable.
    ///
    /// Unset defaults to [`Environment::Development`]; an unrecognized value
    /// is logged and also falls back to development.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV") {
            Ok(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "unrecognized APP_ENV, using development");
                Self::Development
            }),
            Err(_) => Self::Development,
        }
    }
}

impl FromStr for Environment {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Self::Production),
            "staging" | "stage" => Ok(Self::Staging),
            "development" | "dev" => Ok(Self::Development),
            other => Err(PoolError::Config {
                message: format!("unknown environment: {other}"),
            }),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Production => "production",
            Self::Staging => "staging",
            Self::Development => "development",
        };
        f.write_str(name)
    }
}

/// Immutable pool sizing and resilience parameters.
///
/// Constructed once at [`PoolManager`](crate::PoolManager) creation and never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Deployment environment the preset was derived from.
    pub environment: Environment,
    /// Maximum open (physical) connections.
    pub max_open: u32,
    /// Maximum idle connections retained for reuse.
    pub max_idle: u32,
    /// Maximum total lifetime of a connection before it is recycled.
    pub max_lifetime: Duration,
    /// Maximum time a connection may sit idle before it is recycled.
    pub max_idle_time: Duration,
    /// Period of the background health-check loop.
    pub health_check_interval: Duration,
    /// Consecutive failures before the circuit breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a trial operation.
    pub open_timeout: Duration,
    /// Bound on one connection acquisition.
    pub acquire_timeout: Duration,
    /// Default bound on one statement.
    pub query_timeout: Duration,
    /// Period of the background metrics-collection loop.
    pub metrics_interval: Duration,
}

impl PoolConfig {
    /// Build the sizing preset for a deployment environment.
    #[must_use]
    pub fn for_environment(environment: Environment) -> Self {
        match environment {
            Environment::Production => Self {
                environment,
                max_open: 25,
                max_idle: 10,
                max_lifetime: Duration::from_secs(30 * 60),
                max_idle_time: Duration::from_secs(5 * 60),
                health_check_interval: Duration::from_secs(30),
                failure_threshold: 5,
                open_timeout: Duration::from_secs(60),
                acquire_timeout: Duration::from_secs(5),
                query_timeout: Duration::from_secs(30),
                metrics_interval: Duration::from_secs(15),
            },
            Environment::Staging => Self {
                environment,
                max_open: 10,
                max_idle: 5,
                max_lifetime: Duration::from_secs(15 * 60),
                max_idle_time: Duration::from_secs(5 * 60),
                health_check_interval: Duration::from_secs(30),
                failure_threshold: 5,
                open_timeout: Duration::from_secs(60),
                acquire_timeout: Duration::from_secs(5),
                query_timeout: Duration::from_secs(30),
                metrics_interval: Duration::from_secs(15),
            },
            Environment::Development => Self {
                environment,
                max_open: 5,
                max_idle: 2,
                max_lifetime: Duration::from_secs(5 * 60),
                max_idle_time: Duration::from_secs(2 * 60),
                health_check_interval: Duration::from_secs(10),
                failure_threshold: 3,
                open_timeout: Duration::from_secs(30),
                acquire_timeout: Duration::from_secs(3),
                query_timeout: Duration::from_secs(15),
                metrics_interval: Duration::from_secs(10),
            },
        }
    }

    /// Set the maximum open connections.
    #[must_use]
    pub fn max_open(mut self, count: u32) -> Self {
        self.max_open = count;
        self
    }

    /// Set the maximum idle connections.
    #[must_use]
    pub fn max_idle(mut self, count: u32) -> Self {
        self.max_idle = count;
        self
    }

    /// Set the connection lifetime bound.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the idle-time bound.
    #[must_use]
    pub fn max_idle_time(mut self, idle_time: Duration) -> Self {
        self.max_idle_time = idle_time;
        self
    }

    /// Set the health-check interval.
    #[must_use]
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the circuit-breaker failure threshold.
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the circuit-breaker open timeout.
    #[must_use]
    pub fn open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the acquisition timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the default per-statement timeout.
    #[must_use]
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the metrics-collection interval.
    #[must_use]
    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    /// Validate the invariants: `max_idle <= max_open`, `max_open > 0`, and
    /// every duration non-zero.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_open == 0 {
            return Err(PoolError::Config {
                message: "max_open must be greater than zero".to_string(),
            });
        }
        if self.max_idle > self.max_open {
            return Err(PoolError::Config {
                message: format!(
                    "max_idle ({}) must not exceed max_open ({})",
                    self.max_idle, self.max_open
                ),
            });
        }
        if self.failure_threshold == 0 {
            return Err(PoolError::Config {
                message: "failure_threshold must be greater than zero".to_string(),
            });
        }

        let durations = [
            ("max_lifetime", self.max_lifetime),
            ("max_idle_time", self.max_idle_time),
            ("health_check_interval", self.health_check_interval),
            ("open_timeout", self.open_timeout),
            ("acquire_timeout", self.acquire_timeout),
            ("query_timeout", self.query_timeout),
            ("metrics_interval", self.metrics_interval),
        ];
        for (name, duration) in durations {
            if duration.is_zero() {
                return Err(PoolError::Config {
                    message: format!("{name} must be greater than zero"),
                });
            }
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::for_environment(Environment::default())
    }
}
