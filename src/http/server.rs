//! API server: request pipeline and connection handling.
//!
//! # Responsibilities
//! - Compose the request pipeline (span, recovery, write timeout, router)
//! - Continue incoming W3C trace context on the request span
//! - Accept connections and serve HTTP/1.1 and HTTP/2 on each
//! - Enforce the header read and idle timeouts
//! - Drain open connections on shutdown
//!
//! # Design Decisions
//! - Pipeline order, outermost first: trace span → recovery → timeout → router.
//!   Recovery runs inside the span so fault logs carry trace ids
//! - One task per connection, owned by a `JoinSet` so the server can wait for
//!   every connection on drain and abort all of them if it is dropped
//! - Draining stops accepting first, then asks each connection to finish its
//!   in-flight request and close

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::BoxError;
use axum::http::{HeaderMap, Request, Response};
use hyper::body::{Body as HttpBody, Incoming};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use opentelemetry::propagation::{Extractor, TextMapPropagator};
use opentelemetry::trace::TraceContextExt;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tokio::net::TcpStream;
use tokio::task::JoinSet;
use tower::util::BoxCloneService;
use tower::{ServiceBuilder, ServiceExt};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

use crate::config::ServiceConfig;
use crate::http::recovery::RecoveryLayer;
use crate::lifecycle::ShutdownListener;
use crate::net::listener::{accept_backoff, is_transient};
use crate::net::{
    ConnectionActivity, ConnectionGuard, ConnectionTracker, Listener, ListenerError,
};
use crate::observability::HttpInstruments;
use crate::routing::Router;

/// The fully composed request pipeline.
pub type ApiService = BoxCloneService<Request<Body>, Response<Body>, Infallible>;

/// Wrap `router` in the request pipeline.
#[allow(deprecated)]
pub fn build_pipeline(
    router: Router,
    instruments: &HttpInstruments,
    write_timeout: Duration,
) -> ApiService {
    let service = ServiceBuilder::new()
        .map_response(into_api_body)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(request_span)
                .on_response(record_response)
                .on_failure(()),
        )
        .layer(RecoveryLayer::new(instruments.panic_responses.clone()))
        .layer(TimeoutLayer::new(write_timeout))
        .service(router.into_service());

    BoxCloneService::new(service)
}

fn into_api_body<B>(response: Response<B>) -> Response<Body>
where
    B: HttpBody<Data = Bytes> + Send + 'static,
    B::Error: Into<BoxError>,
{
    response.map(Body::new)
}

fn request_span(request: &Request<Body>) -> Span {
    let span = tracing::info_span!(
        "http.request",
        otel.kind = "server",
        http.request.method = %request.method(),
        url.path = %request.uri().path(),
        http.route = tracing::field::Empty,
        http.response.status_code = tracing::field::Empty,
        otel.status_code = tracing::field::Empty,
    );

    let remote = remote_context(request.headers());
    if remote.span().span_context().is_valid() {
        span.set_parent(remote);
    }
    span
}

fn record_response(response: &Response<Body>, latency: Duration, span: &Span) {
    let status = response.status();
    span.record("http.response.status_code", status.as_u16());
    if status.is_server_error() {
        span.record("otel.status_code", "ERROR");
    }
    tracing::debug!(
        status = status.as_u16(),
        latency_ms = latency.as_millis() as u64,
        "Finished processing request"
    );
}

/// Parent context carried by a `traceparent` header, if any.
pub fn remote_context(headers: &HeaderMap) -> opentelemetry::Context {
    TraceContextPropagator::new()
        .extract_with_context(&opentelemetry::Context::new(), &HeaderExtractor(headers))
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|value| value.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|key| key.as_str()).collect()
    }
}

/// Idle timeout between keep-alive requests.
///
/// Zero falls back to the read timeout; if both are zero idle connections
/// are never closed.
fn keep_alive_timeout(idle: Duration, read: Duration) -> Option<Duration> {
    [idle, read].into_iter().find(|timeout| !timeout.is_zero())
}

/// HTTP server for the API listener.
pub struct ApiServer {
    listener: Listener,
    service: ApiService,
    connections: ConnectionTracker,
    read_timeout: Duration,
    idle_timeout: Option<Duration>,
}

impl ApiServer {
    pub fn new(listener: Listener, service: ApiService, config: &ServiceConfig) -> Self {
        Self {
            listener,
            service,
            connections: ConnectionTracker::new(),
            read_timeout: config.read_timeout,
            idle_timeout: keep_alive_timeout(config.idle_timeout, config.read_timeout),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Open-connection tracker, for diagnostics.
    pub fn connections(&self) -> ConnectionTracker {
        self.connections.clone()
    }

    /// Serve until `shutdown` fires, then drain.
    ///
    /// Returns once every connection has closed. A non-transient accept
    /// error aborts open connections and is returned.
    pub async fn run(self, mut shutdown: ShutdownListener) -> Result<(), ListenerError> {
        let mut builder = auto::Builder::new(TokioExecutor::new());
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(self.read_timeout);
        builder.http2().timer(TokioTimer::new());

        tracing::info!(address = %self.listener.local_addr(), "API server started");

        let mut tasks = JoinSet::new();
        let mut accept_failures = 0u32;

        let outcome = loop {
            tokio::select! {
                _ = shutdown.wait() => break Ok(()),
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        accept_failures = 0;
                        tasks.spawn(serve_connection(
                            builder.clone(),
                            stream,
                            peer,
                            self.service.clone(),
                            self.connections.track(),
                            shutdown.clone(),
                            self.idle_timeout,
                        ));
                    }
                    Err(ListenerError::Accept(e)) if is_transient(&e) => {
                        let delay = accept_backoff(accept_failures);
                        accept_failures = accept_failures.saturating_add(1);
                        tracing::warn!(error = %e, retry_in = ?delay, "Transient accept error");
                        if !back_off(delay, &mut shutdown).await {
                            break Ok(());
                        }
                    }
                    Err(e) => break Err(e),
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        };

        let address = self.listener.local_addr();
        drop(self.listener);

        match outcome {
            Ok(()) => {
                tracing::info!(
                    address = %address,
                    open_connections = tasks.len(),
                    "API server draining"
                );
                while tasks.join_next().await.is_some() {}
                tracing::info!(address = %address, "API server stopped");
                Ok(())
            }
            Err(e) => {
                tasks.shutdown().await;
                Err(e)
            }
        }
    }
}

/// Sleep before the next accept. Returns `false` if shutdown fired first.
async fn back_off(delay: Duration, shutdown: &mut ShutdownListener) -> bool {
    tokio::select! {
        _ = shutdown.wait() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

async fn serve_connection(
    builder: auto::Builder<TokioExecutor>,
    stream: TcpStream,
    peer: SocketAddr,
    service: ApiService,
    guard: ConnectionGuard,
    mut shutdown: ShutdownListener,
    idle_timeout: Option<Duration>,
) {
    let activity = guard.activity().clone();
    let hyper_service = hyper::service::service_fn({
        let activity = activity.clone();
        move |request: Request<Incoming>| {
            let in_flight = activity.begin();
            let response = service.clone().oneshot(request.map(Body::new));
            async move {
                let response = response.await;
                drop(in_flight);
                response
            }
        }
    });

    let connection = builder.serve_connection(TokioIo::new(stream), hyper_service);
    tokio::pin!(connection);

    let mut closing = false;
    loop {
        tokio::select! {
            result = connection.as_mut() => {
                if let Err(e) = result {
                    tracing::debug!(
                        connection_id = %guard.id(),
                        peer_addr = %peer,
                        error = %e,
                        "Connection error"
                    );
                }
                break;
            }
            _ = shutdown.wait(), if !closing => {
                closing = true;
                connection.as_mut().graceful_shutdown();
            }
            _ = idle_watch(&activity, idle_timeout), if !closing => {
                tracing::trace!(connection_id = %guard.id(), "Closing idle connection");
                closing = true;
                connection.as_mut().graceful_shutdown();
            }
        }
    }
}

async fn idle_watch(activity: &ConnectionActivity, timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => activity.idle_expired(timeout).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Method, StatusCode};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry::trace::{SpanId, TraceId};
    use opentelemetry_sdk::metrics::SdkMeterProvider;

    use crate::lifecycle::Shutdown;

    fn instruments() -> HttpInstruments {
        HttpInstruments::new(&SdkMeterProvider::builder().build().meter("test"))
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    async fn slow(_request: Request<Body>) -> AxumResponse {
        tokio::time::sleep(Duration::from_secs(60)).await;
        "late".into_response()
    }

    async fn boom(_request: Request<Body>) -> AxumResponse {
        panic!("boom")
    }

    #[test]
    fn extracts_traceparent() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01"
                .parse()
                .unwrap(),
        );

        let cx = remote_context(&headers);
        let span = cx.span();
        let remote = span.span_context();
        assert!(remote.is_valid());
        assert!(remote.is_remote());
        assert_eq!(
            remote.trace_id(),
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
        );
        assert_eq!(remote.span_id(), SpanId::from_hex("00f067aa0ba902b7").unwrap());
    }

    #[test]
    fn missing_traceparent_yields_empty_context() {
        assert!(!remote_context(&HeaderMap::new()).span().span_context().is_valid());
    }

    #[tokio::test]
    async fn pipeline_recovers_panics() {
        let instruments = instruments();
        let mut router = Router::new();
        router.register("GET /boom", boom).unwrap();
        let service = build_pipeline(router, &instruments, Duration::from_secs(5));

        let response = service.oneshot(get("/boom")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(instruments.panic_responses.get("GET", "/boom"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_enforces_write_timeout() {
        let mut router = Router::new();
        router.register("GET /slow", slow).unwrap();
        let service = build_pipeline(router, &instruments(), Duration::from_millis(100));

        let response = service.oneshot(get("/slow")).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }

    #[test]
    fn zero_idle_timeout_falls_back_to_read_timeout() {
        let secs = Duration::from_secs;
        assert_eq!(keep_alive_timeout(secs(120), secs(5)), Some(secs(120)));
        assert_eq!(keep_alive_timeout(Duration::ZERO, secs(5)), Some(secs(5)));
        assert_eq!(keep_alive_timeout(Duration::ZERO, Duration::ZERO), None);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_backoff_yields_to_shutdown() {
        let shutdown = Shutdown::new();
        let mut listener = shutdown.subscribe();

        assert!(back_off(Duration::from_millis(10), &mut listener).await);

        let started = tokio::time::Instant::now();
        let waiting = tokio::spawn(async move {
            back_off(Duration::from_secs(1), &mut listener).await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        shutdown.trigger();

        assert!(!waiting.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
