//! Configuration loading from the process environment.

use std::time::Duration;

use thiserror::Error;

use crate::config::duration::{parse_duration, DurationError};
use crate::config::schema::{LogFormat, ServiceConfig};
use crate::config::validation::validate_listen_addr;

pub const API_HOST: &str = "API_HOST";
pub const DEBUG_HOST: &str = "DEBUG_HOST";
pub const READ_TIMEOUT: &str = "READ_TIMEOUT";
pub const WRITE_TIMEOUT: &str = "WRITE_TIMEOUT";
pub const IDLE_TIMEOUT: &str = "IDLE_TIMEOUT";
pub const SHUTDOWN_TIMEOUT: &str = "SHUTDOWN_TIMEOUT";
pub const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";
pub const SERVICE_NAME: &str = "SERVICE_NAME";
pub const LOG_FORMAT: &str = "LOG_FORMAT";
pub const LOG_FILTER: &str = "RUST_LOG";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration for {key} ({value:?}): {source}")]
    InvalidDuration {
        key: &'static str,
        value: String,
        #[source]
        source: DurationError,
    },

    #[error("invalid listen address for {key} ({value:?}): {reason}")]
    InvalidAddress {
        key: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },

    #[error("environment variable {0} is required")]
    Missing(&'static str),
}

impl ConfigError {
    /// The environment key that caused the failure.
    pub fn key(&self) -> &'static str {
        match self {
            ConfigError::InvalidDuration { key, .. }
            | ConfigError::InvalidAddress { key, .. }
            | ConfigError::InvalidValue { key, .. } => *key,
            ConfigError::Missing(key) => *key,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load_from(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a key to its raw value.
    ///
    /// Absent keys take their defaults. The first malformed value aborts the
    /// load; no partially populated config is ever returned.
    pub fn load_from<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ServiceConfig::default();

        let read_timeout = load_duration(&lookup, READ_TIMEOUT, defaults.read_timeout)?;
        let write_timeout = load_duration(&lookup, WRITE_TIMEOUT, defaults.write_timeout)?;
        let idle_timeout = load_duration(&lookup, IDLE_TIMEOUT, defaults.idle_timeout)?;
        let shutdown_timeout =
            load_duration(&lookup, SHUTDOWN_TIMEOUT, defaults.shutdown_timeout)?;

        let api_host = lookup(API_HOST).unwrap_or(defaults.api_host);
        validate_listen_addr(API_HOST, &api_host)?;
        let debug_host = lookup(DEBUG_HOST).unwrap_or(defaults.debug_host);
        validate_listen_addr(DEBUG_HOST, &debug_host)?;

        let otlp_endpoint = lookup(OTLP_ENDPOINT).filter(|v| !v.trim().is_empty());
        let service_name = lookup(SERVICE_NAME)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.service_name);

        let mut log = defaults.log;
        if let Some(value) = lookup(LOG_FORMAT) {
            log.format = value
                .parse::<LogFormat>()
                .map_err(|()| ConfigError::InvalidValue { key: LOG_FORMAT, value })?;
        }
        if let Some(filter) = lookup(LOG_FILTER) {
            log.filter = filter;
        }

        Ok(ServiceConfig {
            service_name,
            api_host,
            debug_host,
            otlp_endpoint,
            read_timeout,
            write_timeout,
            idle_timeout,
            shutdown_timeout,
            log,
        })
    }

    /// The collector endpoint, which telemetry start-up cannot do without.
    pub fn require_otlp_endpoint(&self) -> Result<&str, ConfigError> {
        self.otlp_endpoint
            .as_deref()
            .ok_or(ConfigError::Missing(OTLP_ENDPOINT))
    }
}

fn load_duration<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => parse_duration(&value)
            .map_err(|source| ConfigError::InvalidDuration { key, value, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(env: &[(&str, &str)]) -> Result<ServiceConfig, ConfigError> {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::load_from(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_environment_is_empty() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api_host, "0.0.0.0:3000");
        assert_eq!(config.debug_host, "0.0.0.0:3010");
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.write_timeout, Duration::from_secs(10));
        assert_eq!(config.idle_timeout, Duration::from_secs(120));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.otlp_endpoint, None);
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn overrides_every_key() {
        let config = load(&[
            (READ_TIMEOUT, "137s"),
            (WRITE_TIMEOUT, "137s"),
            (IDLE_TIMEOUT, "137s"),
            (SHUTDOWN_TIMEOUT, "137s"),
            (API_HOST, "127.0.0.1:8000"),
            (DEBUG_HOST, "127.0.0.1:8001"),
            (OTLP_ENDPOINT, "http://collector:4317"),
            (SERVICE_NAME, "health-check"),
            (LOG_FORMAT, "text"),
            (LOG_FILTER, "debug"),
        ])
        .unwrap();

        assert_eq!(config.read_timeout, Duration::from_secs(137));
        assert_eq!(config.write_timeout, Duration::from_secs(137));
        assert_eq!(config.idle_timeout, Duration::from_secs(137));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(137));
        assert_eq!(config.api_host, "127.0.0.1:8000");
        assert_eq!(config.debug_host, "127.0.0.1:8001");
        assert_eq!(config.require_otlp_endpoint().unwrap(), "http://collector:4317");
        assert_eq!(config.service_name, "health-check");
        assert_eq!(config.log.format, LogFormat::Text);
        assert_eq!(config.log.filter, "debug");
    }

    #[test]
    fn invalid_duration_names_the_key() {
        for key in [READ_TIMEOUT, WRITE_TIMEOUT, IDLE_TIMEOUT, SHUTDOWN_TIMEOUT] {
            let err = load(&[(key, "invalid")]).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidDuration { .. }), "{key}: {err}");
            assert_eq!(err.key(), key);
            assert!(err.to_string().contains(key));
        }
    }

    #[test]
    fn negative_duration_is_rejected() {
        let err = load(&[(SHUTDOWN_TIMEOUT, "-1s")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { source: DurationError::Negative, .. }
        ));
    }

    #[test]
    fn invalid_address_and_log_format_are_rejected() {
        assert_eq!(load(&[(API_HOST, "nope")]).unwrap_err().key(), API_HOST);
        assert_eq!(load(&[(LOG_FORMAT, "xml")]).unwrap_err().key(), LOG_FORMAT);
    }

    #[test]
    fn missing_endpoint_is_reported_only_when_required() {
        let config = load(&[(OTLP_ENDPOINT, "  ")]).unwrap();
        let err = config.require_otlp_endpoint().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(OTLP_ENDPOINT)));
    }
}
