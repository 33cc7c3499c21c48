//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Start telemetry, then install logging on top of its tracer
//! - Register signal handlers
//! - Hand over to [`ServiceLifecycle`] and map the outcome to an exit code
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - No traffic is served until telemetry is wired
//! - Errors before logging is installed go to stderr

use std::process::ExitCode;

use thiserror::Error;

use crate::config::{ConfigError, ServiceConfig};
use crate::lifecycle::service::{
    flush_telemetry, LifecycleError, ServiceLifecycle, ShutdownReport,
};
use crate::lifecycle::signals::ShutdownSignals;
use crate::observability::logging::{self, LoggingError};
use crate::observability::{TelemetryError, TelemetryPipeline, TelemetryResource, BUILD_VERSION};

/// Exit code for a shutdown that had to force-close connections.
pub const EXIT_DEGRADED: u8 = 2;

/// Errors that stop the process.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("failed to register signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

/// Run the service to completion.
pub async fn bootstrap() -> ExitCode {
    match run().await {
        Ok(ShutdownReport::Clean) => ExitCode::SUCCESS,
        Ok(ShutdownReport::Degraded { .. }) => ExitCode::from(EXIT_DEGRADED),
        Err(e @ (StartupError::Config(_) | StartupError::Telemetry(_) | StartupError::Logging(_))) => {
            eprintln!("{}: {e}", env!("CARGO_PKG_NAME"));
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "Service exited with error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ShutdownReport, StartupError> {
    let config = ServiceConfig::from_env()?;
    let identity = TelemetryResource::new(config.service_name.clone(), BUILD_VERSION);
    let telemetry = TelemetryPipeline::start(identity, config.require_otlp_endpoint()?)?;

    let prepared = logging::init(&config.log, telemetry.tracer())
        .map_err(StartupError::from)
        .and_then(|()| ShutdownSignals::register().map_err(StartupError::Signals));
    let mut signals = match prepared {
        Ok(signals) => signals,
        Err(e) => {
            flush_telemetry(telemetry, config.shutdown_timeout).await;
            return Err(e);
        }
    };

    tracing::info!(
        build = BUILD_VERSION,
        service = %config.service_name,
        available_parallelism = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        "Starting service"
    );
    tracing::info!(config = ?config, "Configuration loaded");

    let running = ServiceLifecycle::new(config, telemetry).start().await?;
    Ok(running.run(async move { signals.recv().await }).await?)
}
