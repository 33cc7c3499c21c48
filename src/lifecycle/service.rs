//! Service composition root: startup, run, and ordered shutdown.
//!
//! # Responsibilities
//! - Build counters, routes and the request pipeline from the running telemetry
//! - Bind the API listener (fatal on failure) and the diagnostics listener
//!   (logged on failure)
//! - Wait for either the API listener to fail or a shutdown signal
//! - Drain within the shutdown timeout, force-close past it, then flush telemetry
//!
//! # Design Decisions
//! - Shutdown is strictly sequenced: signal → drain → forced close → telemetry flush
//! - A listener failure skips the drain window; telemetry is still flushed
//! - Telemetry is flushed on every path, including failed startup

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use crate::config::ServiceConfig;
use crate::http::diagnostics::{self, DiagnosticsState};
use crate::http::handlers::api_router;
use crate::http::{build_pipeline, ApiServer};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals::ShutdownReason;
use crate::lifecycle::state::{LifecycleState, StateCell};
use crate::net::{Listener, ListenerError};
use crate::observability::{HttpInstruments, TelemetryPipeline};
use crate::routing::{RouteError, Router};

/// Fatal lifecycle errors.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to build API routes: {0}")]
    Routes(#[from] RouteError),

    #[error("API listener failed: {0}")]
    Listener(#[from] ListenerError),

    #[error("API listener stopped without a shutdown request")]
    UnexpectedClose,

    #[error("API server task failed: {0}")]
    Task(#[from] JoinError),
}

/// How a shutdown that was asked for went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReport {
    /// Every in-flight request finished inside the drain window.
    Clean,
    /// The drain window elapsed; remaining connections were force-closed.
    Degraded { drain_timeout: Duration },
}

/// A service that has not started yet.
#[derive(Debug)]
pub struct ServiceLifecycle {
    config: ServiceConfig,
    telemetry: TelemetryPipeline,
    router: Option<Router>,
    state: StateCell,
}

impl ServiceLifecycle {
    /// `telemetry` must already be running; the lifecycle owns its shutdown.
    pub fn new(config: ServiceConfig, telemetry: TelemetryPipeline) -> Self {
        Self {
            config,
            telemetry,
            router: None,
            state: StateCell::new(),
        }
    }

    /// Serve `router` instead of the standard API routes.
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.watch()
    }

    /// Open both listeners and start serving.
    pub async fn start(self) -> Result<RunningService, LifecycleError> {
        let Self {
            config,
            telemetry,
            router,
            state,
        } = self;
        state.advance(LifecycleState::Starting);

        let instruments = HttpInstruments::new(&telemetry.meter());
        let router = match router.map_or_else(|| api_router(&instruments), Ok) {
            Ok(router) => router,
            Err(e) => return Err(abort_start(telemetry, &config, &state, e.into()).await),
        };

        let api_listener = match Listener::bind(&config.api_host).await {
            Ok(listener) => listener,
            Err(e) => return Err(abort_start(telemetry, &config, &state, e.into()).await),
        };
        let pipeline = build_pipeline(router, &instruments, config.write_timeout);
        let api = ApiServer::new(api_listener, pipeline, &config);
        let api_addr = api.local_addr();

        let shutdown = Shutdown::new();

        let (debug_addr, diagnostics_task) = match Listener::bind(&config.debug_host).await {
            Ok(listener) => {
                let debug_addr = listener.local_addr();
                let router = diagnostics::diagnostics_router(DiagnosticsState::new(
                    config.clone(),
                    telemetry.identity().clone(),
                    instruments.clone(),
                    api.connections(),
                ));
                let listener_shutdown = shutdown.subscribe();
                let task = tokio::spawn(async move {
                    if let Err(e) = diagnostics::serve(listener, router, listener_shutdown).await {
                        tracing::error!(error = %e, "Diagnostics server failed");
                    }
                });
                (Some(debug_addr), Some(task))
            }
            Err(e) => {
                tracing::error!(error = %e, "Diagnostics listener unavailable; continuing without it");
                (None, None)
            }
        };

        let api_task = tokio::spawn(api.run(shutdown.subscribe()));

        state.advance(LifecycleState::Running);
        tracing::info!(
            api_address = %api_addr,
            debug_address = ?debug_addr,
            "Service running"
        );

        Ok(RunningService {
            config,
            telemetry,
            state,
            shutdown,
            instruments,
            api_addr,
            debug_addr,
            api_task,
            diagnostics_task,
        })
    }
}

async fn abort_start(
    telemetry: TelemetryPipeline,
    config: &ServiceConfig,
    state: &StateCell,
    error: LifecycleError,
) -> LifecycleError {
    tracing::error!(error = %error, "Startup failed");
    flush_telemetry(telemetry, config.shutdown_timeout).await;
    state.advance(LifecycleState::Stopped);
    error
}

/// Shut telemetry down, logging rather than returning a flush failure.
pub(crate) async fn flush_telemetry(telemetry: TelemetryPipeline, timeout: Duration) {
    if let Err(e) = telemetry.shutdown(timeout).await {
        tracing::error!(error = %e, "Telemetry shutdown failed");
    }
}

/// A service with both listeners open.
#[derive(Debug)]
pub struct RunningService {
    config: ServiceConfig,
    telemetry: TelemetryPipeline,
    state: StateCell,
    shutdown: Shutdown,
    instruments: HttpInstruments,
    api_addr: SocketAddr,
    debug_addr: Option<SocketAddr>,
    api_task: JoinHandle<Result<(), ListenerError>>,
    diagnostics_task: Option<JoinHandle<()>>,
}

impl RunningService {
    pub fn api_addr(&self) -> SocketAddr {
        self.api_addr
    }

    /// `None` when the diagnostics listener could not be opened.
    pub fn debug_addr(&self) -> Option<SocketAddr> {
        self.debug_addr
    }

    pub fn instruments(&self) -> &HttpInstruments {
        &self.instruments
    }

    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.watch()
    }

    /// Serve until `signal` resolves or the API listener fails, then shut down.
    pub async fn run<F>(mut self, signal: F) -> Result<ShutdownReport, LifecycleError>
    where
        F: Future<Output = ShutdownReason>,
    {
        let reason = tokio::select! {
            exited = &mut self.api_task => {
                let error = match exited {
                    Ok(Ok(())) => LifecycleError::UnexpectedClose,
                    Ok(Err(e)) => LifecycleError::Listener(e),
                    Err(e) => LifecycleError::Task(e),
                };
                tracing::error!(error = %error, "API listener failed");
                return self.finish(Err(error)).await;
            }
            reason = signal => reason,
        };

        let drain_timeout = self.config.shutdown_timeout;
        tracing::info!(reason = %reason, drain_timeout = ?drain_timeout, "Shutdown started");
        self.state.advance(LifecycleState::Draining);
        self.shutdown.trigger();

        let outcome = match tokio::time::timeout(drain_timeout, &mut self.api_task).await {
            Ok(Ok(Ok(()))) => {
                tracing::info!("Drain complete");
                Ok(ShutdownReport::Clean)
            }
            Ok(Ok(Err(e))) => Err(LifecycleError::Listener(e)),
            Ok(Err(e)) => Err(LifecycleError::Task(e)),
            Err(_) => {
                self.api_task.abort();
                let _ = (&mut self.api_task).await;
                tracing::warn!(
                    drain_timeout = ?drain_timeout,
                    "Drain timed out; in-flight requests abandoned"
                );
                Ok(ShutdownReport::Degraded { drain_timeout })
            }
        };

        self.finish(outcome).await
    }

    async fn finish(
        self,
        outcome: Result<ShutdownReport, LifecycleError>,
    ) -> Result<ShutdownReport, LifecycleError> {
        self.shutdown.trigger();
        if let Some(task) = self.diagnostics_task {
            task.abort();
            let _ = task.await;
        }

        flush_telemetry(self.telemetry, self.config.shutdown_timeout).await;
        self.state.advance(LifecycleState::Stopped);
        tracing::info!("Service stopped");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    use opentelemetry_sdk::error::{OTelSdkError, OTelSdkResult};
    use opentelemetry_sdk::metrics::InMemoryMetricExporter;
    use opentelemetry_sdk::trace::{SpanData, SpanExporter};
    use tracing_subscriber::fmt::MakeWriter;

    use crate::observability::TelemetryResource;

    #[derive(Debug)]
    struct UnreachableCollector;

    impl SpanExporter for UnreachableCollector {
        async fn export(&self, _batch: Vec<SpanData>) -> OTelSdkResult {
            Err(OTelSdkError::InternalFailure("connection refused".into()))
        }
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn failed_telemetry_flush_is_logged() {
        let telemetry = TelemetryPipeline::with_exporters(
            TelemetryResource::new("health-service-test", "test-build"),
            UnreachableCollector,
            InMemoryMetricExporter::default(),
        );
        opentelemetry::trace::Tracer::in_span(&telemetry.tracer(), "unsent", |_cx| {});

        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(captured.clone())
            .finish();
        let _default = tracing::subscriber::set_default(subscriber);

        flush_telemetry(telemetry, Duration::from_secs(5)).await;

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("ERROR"), "{output}");
        assert!(output.contains("Telemetry shutdown failed"), "{output}");
        assert!(output.contains("connection refused"), "{output}");
    }
}
