//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use health_service::lifecycle::{LifecycleError, ShutdownReason, ShutdownReport};
use health_service::observability::{HttpInstruments, TelemetryPipeline, TelemetryResource};
use health_service::routing::Router;
use health_service::{ServiceConfig, ServiceLifecycle};
use opentelemetry_sdk::metrics::InMemoryMetricExporter;
use opentelemetry_sdk::trace::InMemorySpanExporter;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Config bound to ephemeral loopback ports.
pub fn test_config() -> ServiceConfig {
    ServiceConfig {
        api_host: "127.0.0.1:0".to_string(),
        debug_host: "127.0.0.1:0".to_string(),
        shutdown_timeout: Duration::from_secs(2),
        ..ServiceConfig::default()
    }
}

/// Telemetry exporting to memory.
pub fn test_telemetry() -> (TelemetryPipeline, InMemorySpanExporter) {
    let spans = InMemorySpanExporter::default();
    let telemetry = TelemetryPipeline::with_exporters(
        TelemetryResource::new("health-service-test", "test-build"),
        spans.clone(),
        InMemoryMetricExporter::default(),
    );
    (telemetry, spans)
}

/// A started service, stopped by [`TestService::stop`].
pub struct TestService {
    pub api: SocketAddr,
    pub debug: Option<SocketAddr>,
    pub instruments: HttpInstruments,
    stop: Option<oneshot::Sender<()>>,
    handle: JoinHandle<Result<ShutdownReport, LifecycleError>>,
}

impl TestService {
    pub async fn start(config: ServiceConfig) -> Self {
        let (telemetry, _) = test_telemetry();
        Self::start_with(config, telemetry, None).await
    }

    pub async fn start_with(
        config: ServiceConfig,
        telemetry: TelemetryPipeline,
        router: Option<Router>,
    ) -> Self {
        let mut lifecycle = ServiceLifecycle::new(config, telemetry);
        if let Some(router) = router {
            lifecycle = lifecycle.with_router(router);
        }
        let running = lifecycle.start().await.expect("service starts");

        let api = running.api_addr();
        let debug = running.debug_addr();
        let instruments = running.instruments().clone();
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(running.run(async move {
            let _ = stopped.await;
            ShutdownReason::Requested
        }));

        Self {
            api,
            debug,
            instruments,
            stop: Some(stop),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.api, path)
    }

    pub fn debug_url(&self, path: &str) -> String {
        format!("http://{}{}", self.debug.expect("diagnostics listener"), path)
    }

    /// Deliver the shutdown signal and wait for the lifecycle to finish.
    pub async fn stop(mut self) -> Result<ShutdownReport, LifecycleError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("lifecycle finishes")
            .expect("lifecycle task")
    }
}

/// Client that opens a fresh connection for every request.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}
