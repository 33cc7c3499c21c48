//! Structured logging.
//!
//! # Responsibilities
//! - Install the process log sink once, after the telemetry pipeline is up
//! - Bridge `tracing` spans into OpenTelemetry through the pipeline's tracer
//! - Correlate every record with its trace via [`TraceAwareFormat`]
//!
//! # Design Decisions
//! - JSON by default, one object per line with event fields flattened
//! - Filter directives come from config (`RUST_LOG`), default `info`
//! - Installation fails rather than silently replacing an existing subscriber

use opentelemetry_sdk::trace::SdkTracer;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogConfig, LogFormat};
use crate::observability::trace_context::TraceAwareFormat;

/// Error type for logging initialization.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("log subscriber already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Install the global log sink.
pub fn init(config: &LogConfig, tracer: SdkTracer) -> Result<(), LoggingError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|source| LoggingError::Filter {
        filter: config.filter.clone(),
        source,
    })?;

    let fmt_layer = match config.format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .event_format(TraceAwareFormat::new(
                tracing_subscriber::fmt::format()
                    .json()
                    .flatten_event(true)
                    .with_current_span(false)
                    .with_span_list(false),
            ))
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .event_format(TraceAwareFormat::new(
                tracing_subscriber::fmt::format().with_ansi(false),
            ))
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .try_init()?;

    Ok(())
}
