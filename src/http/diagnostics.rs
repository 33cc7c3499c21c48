//! Diagnostics listener.
//!
//! # Responsibilities
//! - Serve `GET /debug/vars`: a JSON dump of process and service variables
//! - Stop with the rest of the service on shutdown
//!
//! # Design Decisions
//! - Read-only: reports the effective config, counters and connection count,
//!   never changes them
//! - Failure here never takes down the API listener

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use serde::Serialize;

use crate::config::ServiceConfig;
use crate::lifecycle::ShutdownListener;
use crate::net::{ConnectionTracker, Listener};
use crate::observability::metrics::CounterSample;
use crate::observability::{HttpInstruments, TelemetryResource};

/// Everything the diagnostics routes read from.
#[derive(Debug, Clone)]
pub struct DiagnosticsState {
    inner: Arc<DiagnosticsInner>,
}

#[derive(Debug)]
struct DiagnosticsInner {
    config: ServiceConfig,
    identity: TelemetryResource,
    instruments: HttpInstruments,
    connections: ConnectionTracker,
    started: Instant,
}

impl DiagnosticsState {
    pub fn new(
        config: ServiceConfig,
        identity: TelemetryResource,
        instruments: HttpInstruments,
        connections: ConnectionTracker,
    ) -> Self {
        Self {
            inner: Arc::new(DiagnosticsInner {
                config,
                identity,
                instruments,
                connections,
                started: Instant::now(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct Vars<'a> {
    build: &'a str,
    service: &'a str,
    pid: u32,
    uptime_seconds: u64,
    available_parallelism: usize,
    config: &'a ServiceConfig,
    active_connections: u64,
    counters: BTreeMap<&'static str, Vec<CounterSample>>,
}

/// Routes served on the diagnostics listener.
pub fn diagnostics_router(state: DiagnosticsState) -> axum::Router {
    axum::Router::new()
        .route("/debug/vars", get(vars))
        .with_state(state)
}

async fn vars(State(state): State<DiagnosticsState>) -> Json<serde_json::Value> {
    let inner = &state.inner;
    let vars = Vars {
        build: inner.identity.service_version(),
        service: inner.identity.service_name(),
        pid: std::process::id(),
        uptime_seconds: inner.started.elapsed().as_secs(),
        available_parallelism: std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        config: &inner.config,
        active_connections: inner.connections.active_count(),
        counters: [
            &inner.instruments.ok_responses,
            &inner.instruments.panic_responses,
        ]
        .into_iter()
        .map(|counter| (counter.name(), counter.snapshot()))
        .collect(),
    };
    Json(serde_json::to_value(vars).unwrap_or_default())
}

/// Serve diagnostics on `listener` until `shutdown` fires.
pub async fn serve(
    listener: Listener,
    router: axum::Router,
    mut shutdown: ShutdownListener,
) -> std::io::Result<()> {
    let address = listener.local_addr();
    tracing::info!(address = %address, "Diagnostics server started");

    axum::serve(listener.into_inner(), router)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    tracing::info!(address = %address, "Diagnostics server stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use tower::ServiceExt;

    #[tokio::test]
    async fn vars_reports_config_and_counters() {
        let instruments =
            HttpInstruments::new(&SdkMeterProvider::builder().build().meter("test"));
        instruments.panic_responses.increment("GET", "/panic");
        instruments.ok_responses.increment("GET", "/liveness");
        instruments.ok_responses.increment("GET", "/liveness");

        let connections = ConnectionTracker::new();
        let _open = connections.track();

        let state = DiagnosticsState::new(
            ServiceConfig::default(),
            TelemetryResource::new("health-service", "test-build"),
            instruments,
            connections,
        );

        let request = Request::builder()
            .uri("/debug/vars")
            .body(Body::empty())
            .unwrap();
        let response = diagnostics_router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let vars: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(vars["build"], "test-build");
        assert_eq!(vars["service"], "health-service");
        assert_eq!(vars["active_connections"], 1);
        assert_eq!(vars["config"]["api_host"], "0.0.0.0:3000");
        assert_eq!(vars["config"]["read_timeout"], "5s");
        assert_eq!(
            vars["counters"]["http.ok.responses"][0],
            serde_json::json!({ "method": "GET", "path": "/liveness", "count": 2 })
        );
        assert_eq!(vars["counters"]["http.panic.responses"][0]["count"], 1);
    }
}
