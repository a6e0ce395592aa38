//! Service configuration loaded from environment variables.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Order service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `ORDERS_LOCK_STRIPES`: number of order lock stripes (default: `256`)
/// - `ORDERS_LOCK_TIMEOUT_MS`: order lock wait (default: `5000`)
/// - `ORDERS_MAX_IN_FLIGHT`: concurrent mutations admitted (default: `64`)
/// - `ORDERS_QUEUE_TIMEOUT_MS`: wait for admission (default: `2000`)
/// - `ORDERS_OPERATION_TIMEOUT_MS`: default request deadline (default: `30000`)
/// - `ORDERS_RETRY_ATTEMPTS`: attempts per operation (default: `3`)
/// - `ORDERS_RETRY_INITIAL_DELAY_MS`: first backoff delay (default: `50`)
/// - `ORDERS_NOTIFICATION_QUEUE`: notification queue capacity (default: `1024`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `ORDERS_LOG_FORMAT`: `text` or `json` (default: `text`)
///
/// Unparseable values fall back to the default.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub lock_stripes: usize,
    pub lock_timeout: Duration,
    pub max_in_flight: usize,
    pub queue_timeout: Duration,
    pub operation_timeout: Duration,
    pub retry: RetryPolicy,
    pub notification_queue_capacity: usize,
    pub log_level: String,
    pub log_format: LogFormat,
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

impl ServiceConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry = RetryPolicy {
            max_attempts: env_parse("ORDERS_RETRY_ATTEMPTS")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.retry.max_attempts),
            initial_delay: env_millis("ORDERS_RETRY_INITIAL_DELAY_MS")
                .unwrap_or(defaults.retry.initial_delay),
            ..defaults.retry
        };

        Self {
            lock_stripes: env_parse("ORDERS_LOCK_STRIPES")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.lock_stripes),
            lock_timeout: env_millis("ORDERS_LOCK_TIMEOUT_MS").unwrap_or(defaults.lock_timeout),
            max_in_flight: env_parse("ORDERS_MAX_IN_FLIGHT")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_in_flight),
            queue_timeout: env_millis("ORDERS_QUEUE_TIMEOUT_MS").unwrap_or(defaults.queue_timeout),
            operation_timeout: env_millis("ORDERS_OPERATION_TIMEOUT_MS")
                .unwrap_or(defaults.operation_timeout),
            retry,
            notification_queue_capacity: env_parse("ORDERS_NOTIFICATION_QUEUE")
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.notification_queue_capacity),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env_parse("ORDERS_LOG_FORMAT").unwrap_or(defaults.log_format),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            lock_stripes: 256,
            lock_timeout: Duration::from_secs(5),
            max_in_flight: 64,
            queue_timeout: Duration::from_secs(2),
            operation_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            notification_queue_capacity: 1024,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "ORDERS_LOCK_STRIPES",
        "ORDERS_LOCK_TIMEOUT_MS",
        "ORDERS_MAX_IN_FLIGHT",
        "ORDERS_QUEUE_TIMEOUT_MS",
        "ORDERS_OPERATION_TIMEOUT_MS",
        "ORDERS_RETRY_ATTEMPTS",
        "ORDERS_RETRY_INITIAL_DELAY_MS",
        "ORDERS_NOTIFICATION_QUEUE",
        "RUST_LOG",
        "ORDERS_LOG_FORMAT",
    ];

    fn clear_env() {
        for var in VARS {
            // SAFETY: tests touching the environment run under #[serial].
            unsafe { std::env::remove_var(var) };
        }
    }

    fn set_env(name: &str, value: &str) {
        // SAFETY: tests touching the environment run under #[serial].
        unsafe { std::env::set_var(name, value) };
    }

    #[test]
    fn test_default_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.lock_stripes, 256);
        assert_eq!(config.lock_timeout, Duration::from_millis(5000));
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(50));
        assert_eq!(config.notification_queue_capacity, 1024);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        set_env("ORDERS_LOCK_STRIPES", "16");
        set_env("ORDERS_LOCK_TIMEOUT_MS", "250");
        set_env("ORDERS_RETRY_ATTEMPTS", "5");
        set_env("ORDERS_LOG_FORMAT", "JSON");
        set_env("RUST_LOG", "debug");

        let config = ServiceConfig::from_env();
        assert_eq!(config.lock_stripes, 16);
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.max_in_flight, 64);
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        clear_env();
        set_env("ORDERS_MAX_IN_FLIGHT", "lots");
        set_env("ORDERS_LOCK_STRIPES", "0");
        set_env("ORDERS_LOG_FORMAT", "xml");

        let config = ServiceConfig::from_env();
        assert_eq!(config.max_in_flight, 64);
        assert_eq!(config.lock_stripes, 256);
        assert_eq!(config.log_format, LogFormat::Text);
        clear_env();
    }
}
