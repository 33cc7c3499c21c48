//! Trace and metric export pipeline.
//!
//! # Responsibilities
//! - Build OTLP exporters for traces and metrics against one collector endpoint
//! - Wrap them in a batching tracer provider and a periodic-flush meter provider
//! - Attach the service identity to everything exported
//! - Flush and stop both providers within a caller-supplied bound
//!
//! # Design Decisions
//! - Exporter construction failure is returned to the caller; start-up treats it as fatal
//! - Providers are owned here and handed out as tracer/meter handles; nothing is
//!   registered globally
//! - Shutdown runs on the blocking pool because provider shutdown blocks the caller

use std::time::Duration;

use opentelemetry::metrics::{Meter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{ExporterBuildError, MetricExporter, SpanExporter, WithExportConfig};
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::{SdkTracer, SdkTracerProvider, SpanExporter as ExportSpans};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::Resource;
use thiserror::Error;

/// Instrumentation scope name for every tracer and meter handed out.
pub const INSTRUMENTATION_SCOPE: &str = env!("CARGO_PKG_NAME");

/// Build version stamped at compile time through `BUILD_VERSION`.
pub const BUILD_VERSION: &str = match option_env!("BUILD_VERSION") {
    Some(version) => version,
    None => "develop",
};

/// Error type for telemetry operations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to build trace exporter: {0}")]
    SpanExporter(#[source] ExporterBuildError),

    #[error("failed to build metric exporter: {0}")]
    MetricExporter(#[source] ExporterBuildError),

    #[error("telemetry flush did not finish within {0:?}")]
    FlushTimeout(Duration),

    #[error("telemetry flush failed: {0}")]
    Flush(String),
}

/// Service identity attached to every exported span and metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryResource {
    service_name: String,
    service_version: String,
}

impl TelemetryResource {
    pub fn new(service_name: impl Into<String>, service_version: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_version: service_version.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    fn to_resource(&self) -> Resource {
        Resource::builder()
            .with_service_name(self.service_name.clone())
            .with_attribute(KeyValue::new("service.version", self.service_version.clone()))
            .build()
    }
}

/// Running trace and metric providers.
///
/// Tracer and meter handles are cheap clones that stay valid until
/// [`TelemetryPipeline::shutdown`]; after that they silently drop data.
/// Clones of the pipeline share its providers, so shutting down any clone
/// stops them all.
#[derive(Debug, Clone)]
pub struct TelemetryPipeline {
    identity: TelemetryResource,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl TelemetryPipeline {
    /// Start exporting to the OTLP/gRPC collector at `endpoint`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(identity: TelemetryResource, endpoint: &str) -> Result<Self, TelemetryError> {
        let spans = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(TelemetryError::SpanExporter)?;

        let metrics = MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(TelemetryError::MetricExporter)?;

        Ok(Self::with_exporters(identity, spans, metrics))
    }

    /// Build the pipeline around caller-supplied exporters.
    pub fn with_exporters<T, M>(identity: TelemetryResource, spans: T, metrics: M) -> Self
    where
        T: ExportSpans + 'static,
        M: PushMetricExporter,
    {
        let resource = identity.to_resource();

        let tracer_provider = SdkTracerProvider::builder()
            .with_resource(resource.clone())
            .with_batch_exporter(spans)
            .build();

        let reader = PeriodicReader::builder(metrics).build();
        let meter_provider = SdkMeterProvider::builder()
            .with_resource(resource)
            .with_reader(reader)
            .build();

        Self {
            identity,
            tracer_provider,
            meter_provider,
        }
    }

    pub fn identity(&self) -> &TelemetryResource {
        &self.identity
    }

    /// Tracer for the request pipeline and the log bridge.
    pub fn tracer(&self) -> SdkTracer {
        self.tracer_provider.tracer(INSTRUMENTATION_SCOPE)
    }

    /// Meter from which the service's instruments are created.
    pub fn meter(&self) -> Meter {
        self.meter_provider.meter(INSTRUMENTATION_SCOPE)
    }

    /// Stop accepting telemetry and flush what is buffered.
    ///
    /// Waits at most `timeout`. Flush failures are returned, never raised.
    pub async fn shutdown(self, timeout: Duration) -> Result<(), TelemetryError> {
        let Self {
            tracer_provider,
            meter_provider,
            ..
        } = self;

        let flush = tokio::task::spawn_blocking(move || {
            let traces = tracer_provider.shutdown();
            let metrics = meter_provider.shutdown();
            (traces, metrics)
        });

        match tokio::time::timeout(timeout, flush).await {
            Err(_) => Err(TelemetryError::FlushTimeout(timeout)),
            Ok(Err(join)) => Err(TelemetryError::Flush(join.to_string())),
            Ok(Ok((traces, metrics))) => flush_outcome(traces, metrics),
        }
    }

    /// Export everything buffered so far without stopping the providers.
    pub async fn force_flush(&self) -> Result<(), TelemetryError> {
        let tracer_provider = self.tracer_provider.clone();
        let meter_provider = self.meter_provider.clone();

        let (traces, metrics) = tokio::task::spawn_blocking(move || {
            (tracer_provider.force_flush(), meter_provider.force_flush())
        })
        .await
        .map_err(|join| TelemetryError::Flush(join.to_string()))?;

        flush_outcome(traces, metrics)
    }
}

fn flush_outcome(traces: OTelSdkResult, metrics: OTelSdkResult) -> Result<(), TelemetryError> {
    let mut failures = Vec::new();
    if let Err(e) = traces {
        failures.push(format!("traces: {e}"));
    }
    if let Err(e) = metrics {
        failures.push(format!("metrics: {e}"));
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(TelemetryError::Flush(failures.join("; ")))
    }
}
