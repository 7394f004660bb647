use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "FEEDWIRE";

/// How a connection decides that its socket is still alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthCheckMode {
    /// Send an application-level ping every `ping_interval_ms` and require traffic
    /// within twice that interval
    Ping,
    /// No ping support: reconnect when nothing arrived within `staleness_window_ms`
    Staleness,
}

impl FromStr for HealthCheckMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ping" => Ok(Self::Ping),
            "staleness" | "stale" => Ok(Self::Staleness),
            other => Err(ConfigError::InvalidConfiguration(format!(
                "Unknown health check mode: {}",
                other
            ))),
        }
    }
}

/// Per-exchange streaming connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Base reconnect backoff in milliseconds
    pub reconnect_delay_ms: u64,
    /// Growth factor applied per reconnect attempt
    pub backoff_multiplier: f64,
    /// Ceiling for a single reconnect delay in milliseconds
    pub max_reconnect_delay_ms: u64,
    /// Attempts before falling back to the long cooldown
    pub max_reconnect_attempts: u32,
    /// Cooldown once `max_reconnect_attempts` is exceeded
    pub reconnect_cooldown_ms: u64,
    /// Connection timeout for the first attempt
    pub connect_timeout_ms: u64,
    /// Extra connect timeout granted per failed attempt
    pub connect_timeout_step_ms: u64,
    /// Cap for the adaptive connect timeout
    pub max_connect_timeout_ms: u64,
    /// Ping cadence for ping-capable protocols
    pub ping_interval_ms: u64,
    /// Silence tolerated by the staleness watchdog
    pub staleness_window_ms: u64,
    /// How often the staleness watchdog looks at the clock
    pub health_check_interval_ms: u64,
    pub health_check: HealthCheckMode,
    /// Capacity of the connectivity event broadcast
    pub event_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            max_reconnect_delay_ms: 30_000,
            max_reconnect_attempts: 10,
            reconnect_cooldown_ms: 300_000, // 5 minutes
            connect_timeout_ms: 10_000,
            connect_timeout_step_ms: 2_000,
            max_connect_timeout_ms: 30_000,
            ping_interval_ms: 20_000,
            staleness_window_ms: 60_000,
            health_check_interval_ms: 5_000,
            health_check: HealthCheckMode::Ping,
            event_buffer: 1024,
        }
    }
}

impl ConnectionConfig {
    /// Configuration for protocols without an application-level ping
    pub fn staleness_based() -> Self {
        Self {
            health_check: HealthCheckMode::Staleness,
            ..Self::default()
        }
    }

    pub fn with_health_check(mut self, mode: HealthCheckMode) -> Self {
        self.health_check = mode;
        self
    }

    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_ping_interval_ms(mut self, interval_ms: u64) -> Self {
        self.ping_interval_ms = interval_ms;
        self
    }

    pub fn with_staleness_window_ms(mut self, window_ms: u64) -> Self {
        self.staleness_window_ms = window_ms;
        self
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn staleness_window(&self) -> Duration {
        Duration::from_millis(self.staleness_window_ms)
    }

    /// Interval of the health monitor tick for the configured mode
    pub fn health_tick(&self) -> Duration {
        match self.health_check {
            HealthCheckMode::Ping => self.ping_interval(),
            HealthCheckMode::Staleness => Duration::from_millis(self.health_check_interval_ms),
        }
    }

    /// Connect timeout that grows with the number of failed attempts, capped
    pub fn connect_timeout(&self, reconnect_attempts: u32) -> Duration {
        let grown = self
            .connect_timeout_ms
            .saturating_add(self.connect_timeout_step_ms.saturating_mul(u64::from(reconnect_attempts)));
        Duration::from_millis(grown.min(self.max_connect_timeout_ms.max(self.connect_timeout_ms)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reconnect_delay_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "reconnect_delay_ms must be > 0".to_string(),
            ));
        }
        if self.backoff_multiplier < 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(ConfigError::InvalidConfiguration(
                "backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.max_reconnect_delay_ms < self.reconnect_delay_ms {
            return Err(ConfigError::InvalidConfiguration(
                "max_reconnect_delay_ms must be >= reconnect_delay_ms".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 || self.ping_interval_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "connect_timeout_ms and ping_interval_ms must be > 0".to_string(),
            ));
        }
        if self.staleness_window_ms == 0 || self.health_check_interval_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "staleness_window_ms and health_check_interval_ms must be > 0".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "event_buffer must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Executor-wide retry defaults; per-call values live in `RetryOptions`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_factor: f64,
    pub timeout_ms: u64,
    /// Symmetric jitter applied to every retry delay, as a fraction of the delay
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            backoff_factor: 1.5,
            timeout_ms: 15_000,
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::InvalidConfiguration(
                "jitter_factor must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.backoff_factor < 1.0 || !self.backoff_factor.is_finite() {
            return Err(ConfigError::InvalidConfiguration(
                "backoff_factor must be >= 1.0".to_string(),
            ));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a circuit
    pub failure_threshold: u32,
    /// Time an open circuit waits before letting one trial through
    pub reset_timeout_ms: u64,
    /// Idle closed circuits older than this are dropped
    pub idle_retention_ms: u64,
    /// Minimum spacing between two garbage collection sweeps
    pub gc_interval_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            idle_retention_ms: 24 * 60 * 60 * 1_000,
            gc_interval_ms: 60 * 60 * 1_000,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout_ms: u64) -> Self {
        Self {
            failure_threshold,
            reset_timeout_ms,
            ..Self::default()
        }
    }

    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn idle_retention(&self) -> Duration {
        Duration::from_millis(self.idle_retention_ms)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "failure_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Maximum number of retained error records
    pub max_errors: usize,
    /// Records older than this are evicted by `clean_old_errors`
    pub retention_ms: u64,
    /// Repeats of one signature that raise a critical-pattern signal
    pub critical_error_threshold: u64,
    /// Fraction of errors kept for sources without an explicit rate
    pub default_sample_rate: f64,
    /// Per-source sample rates for high-volume sources
    pub sample_rates: HashMap<String, f64>,
    pub cleanup_interval_ms: u64,
    /// Number of signatures reported in `ErrorStats::top_signatures`
    pub top_signatures: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            max_errors: 500,
            retention_ms: 60 * 60 * 1_000,
            critical_error_threshold: 10,
            default_sample_rate: 1.0,
            sample_rates: HashMap::new(),
            cleanup_interval_ms: 60_000,
            top_signatures: 10,
        }
    }
}

impl AnalyticsConfig {
    pub fn with_sample_rate(mut self, source: impl Into<String>, rate: f64) -> Self {
        self.sample_rates.insert(source.into(), rate);
        self
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    pub fn sample_rate_for(&self, source: &str) -> f64 {
        self.sample_rates
            .get(source)
            .copied()
            .unwrap_or(self.default_sample_rate)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let rates_valid = std::iter::once(&self.default_sample_rate)
            .chain(self.sample_rates.values())
            .all(|rate| (0.0..=1.0).contains(rate));
        if !rates_valid {
            return Err(ConfigError::InvalidConfiguration(
                "sample rates must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.max_errors == 0 || self.critical_error_threshold == 0 {
            return Err(ConfigError::InvalidConfiguration(
                "max_errors and critical_error_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration handed to the composition root
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub connection: ConnectionConfig,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub analytics: AnalyticsConfig,
}

impl FeedConfig {
    /// Create configuration from environment variables
    ///
    /// Every field is optional and falls back to its default. Recognized variables:
    /// - `FEEDWIRE_RECONNECT_DELAY_MS`, `FEEDWIRE_MAX_RECONNECT_ATTEMPTS`
    /// - `FEEDWIRE_PING_INTERVAL_MS`, `FEEDWIRE_STALENESS_WINDOW_MS`, `FEEDWIRE_HEALTH_CHECK`
    /// - `FEEDWIRE_CONNECT_TIMEOUT_MS`
    /// - `FEEDWIRE_MAX_RETRIES`, `FEEDWIRE_RETRY_DELAY_MS`, `FEEDWIRE_BACKOFF_FACTOR`,
    ///   `FEEDWIRE_RETRY_TIMEOUT_MS`, `FEEDWIRE_JITTER_FACTOR`
    /// - `FEEDWIRE_CIRCUIT_BREAKER_THRESHOLD`, `FEEDWIRE_CIRCUIT_RESET_TIMEOUT_MS`
    /// - `FEEDWIRE_MAX_ERRORS`, `FEEDWIRE_ERROR_RETENTION_MS`,
    ///   `FEEDWIRE_CRITICAL_ERROR_THRESHOLD`, `FEEDWIRE_ERROR_SAMPLE_RATE`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let conn = &mut config.connection;
        override_from_env("RECONNECT_DELAY_MS", &mut conn.reconnect_delay_ms)?;
        override_from_env("MAX_RECONNECT_ATTEMPTS", &mut conn.max_reconnect_attempts)?;
        override_from_env("PING_INTERVAL_MS", &mut conn.ping_interval_ms)?;
        override_from_env("STALENESS_WINDOW_MS", &mut conn.staleness_window_ms)?;
        override_from_env("HEALTH_CHECK", &mut conn.health_check)?;
        override_from_env("CONNECT_TIMEOUT_MS", &mut conn.connect_timeout_ms)?;

        let retry = &mut config.retry;
        override_from_env("MAX_RETRIES", &mut retry.max_retries)?;
        override_from_env("RETRY_DELAY_MS", &mut retry.retry_delay_ms)?;
        override_from_env("BACKOFF_FACTOR", &mut retry.backoff_factor)?;
        override_from_env("RETRY_TIMEOUT_MS", &mut retry.timeout_ms)?;
        override_from_env("JITTER_FACTOR", &mut retry.jitter_factor)?;

        let breaker = &mut config.circuit_breaker;
        override_from_env("CIRCUIT_BREAKER_THRESHOLD", &mut breaker.failure_threshold)?;
        override_from_env("CIRCUIT_RESET_TIMEOUT_MS", &mut breaker.reset_timeout_ms)?;

        let analytics = &mut config.analytics;
        override_from_env("MAX_ERRORS", &mut analytics.max_errors)?;
        override_from_env("ERROR_RETENTION_MS", &mut analytics.retention_ms)?;
        override_from_env(
            "CRITICAL_ERROR_THRESHOLD",
            &mut analytics.critical_error_threshold,
        )?;
        override_from_env("ERROR_SAMPLE_RATE", &mut analytics.default_sample_rate)?;

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from a .env file and environment variables
    ///
    /// A missing file is not an error; system environment variables still apply.
    #[cfg(feature = "env-file")]
    pub fn from_env_file(env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(_) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env()
    }

    /// Load configuration with automatic .env file detection
    ///
    /// Tries `.env.local`, then `.env.{ENVIRONMENT}`, then `.env`; only the first file
    /// found is loaded.
    #[cfg(feature = "env-file")]
    pub fn from_env_auto() -> Result<Self, ConfigError> {
        let env_files = [
            ".env.local".to_string(),
            format!(
                ".env.{}",
                env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string())
            ),
            ".env".to_string(),
        ];

        for env_file in &env_files {
            match dotenv::from_path(env_file) {
                Ok(_) => break,
                Err(dotenv::Error::Io(io_err))
                    if io_err.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(ConfigError::InvalidConfiguration(format!(
                        "Failed to load .env file '{}': {}",
                        env_file, e
                    )));
                }
            }
        }

        Self::from_env()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection.validate()?;
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.analytics.validate()
    }
}

fn override_from_env<T>(suffix: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let key = format!("{}_{}", ENV_PREFIX, suffix);
    match env::var(&key) {
        Ok(raw) => {
            *target = raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::InvalidValue { key, reason: format!("{}", e) })?;
            Ok(())
        }
        Err(env::VarError::NotPresent) => Ok(()),
        Err(e) => Err(ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
        }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl std::fmt::Display for HealthCheckMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ping => write!(f, "ping"),
            Self::Staleness => write!(f, "staleness"),
        }
    }
}
