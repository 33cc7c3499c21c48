//! Configuration schema definitions.
//!
//! The effective configuration is serialized (not deserialized) so the
//! diagnostics surface can report what the process is running with.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Serializer};

pub const DEFAULT_API_HOST: &str = "0.0.0.0:3000";
pub const DEFAULT_DEBUG_HOST: &str = "0.0.0.0:3010";
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Root configuration for the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceConfig {
    /// `service.name` attached to every exported span and metric.
    pub service_name: String,

    /// API listen address (e.g., "0.0.0.0:3000").
    pub api_host: String,

    /// Diagnostics listen address.
    pub debug_host: String,

    /// OTLP collector endpoint. Optional at load time; required to start telemetry.
    pub otlp_endpoint: Option<String>,

    /// Upper bound for reading request headers.
    #[serde(serialize_with = "human_duration")]
    pub read_timeout: Duration,

    /// Upper bound for producing a response once the request is read.
    #[serde(serialize_with = "human_duration")]
    pub write_timeout: Duration,

    /// Keep-alive connections with nothing in flight are closed after this.
    #[serde(serialize_with = "human_duration")]
    pub idle_timeout: Duration,

    /// Drain window for in-flight requests, also bounds the telemetry flush.
    #[serde(serialize_with = "human_duration")]
    pub shutdown_timeout: Duration,

    /// Log sink settings.
    pub log: LogConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            api_host: DEFAULT_API_HOST.to_string(),
            debug_host: DEFAULT_DEBUG_HOST.to_string(),
            otlp_endpoint: None,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            log: LogConfig::default(),
        }
    }
}

/// Log sink configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogConfig {
    /// Output encoding.
    pub format: LogFormat,

    /// `EnvFilter` directives (e.g., "info,health_service=debug").
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Log line encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human readable single-line text.
    Text,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" => Ok(LogFormat::Text),
            _ => Err(()),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => f.write_str("json"),
            LogFormat::Text => f.write_str("text"),
        }
    }
}

fn human_duration<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("{value:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_serialize_in_readable_form() {
        let json = serde_json::to_value(ServiceConfig::default()).unwrap();
        assert_eq!(json["read_timeout"], "5s");
        assert_eq!(json["idle_timeout"], "120s");
        assert_eq!(json["log"]["format"], "json");
        assert!(json["otlp_endpoint"].is_null());
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("yaml".parse::<LogFormat>().is_err());
    }
}
