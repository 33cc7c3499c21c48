//! Fault containment for the request pipeline.
//!
//! # Responsibilities
//! - Run every request's unit of work inside an explicit fault boundary
//! - Turn a handler panic into a fixed `500` response
//! - Log the fault with method and path and count it in `http.panic.responses`
//! - Keep faults raised while the response body streams from taking down the connection task
//!
//! # Design Decisions
//! - The boundary yields [`Outcome::Completed`] or [`Outcome::Faulted`]; only the
//!   latter is converted, ordinary `Err` values pass through untouched
//! - Once headers are on the wire the status cannot change: a body fault is
//!   logged and counted, then the stream is aborted
//! - Sits inside the request span so fault logs carry the trace ids

use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use tower::{Layer, Service};

use crate::observability::RequestCounter;

/// Body of every recovered response.
pub const FAILURE_BODY: &str = "Internal Server Error";

/// Result of running a unit of work inside [`fault_boundary`].
#[derive(Debug)]
pub enum Outcome<T> {
    Completed(T),
    Faulted(Fault),
}

/// A captured panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    message: String,
}

impl Fault {
    fn from_payload(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Drive `work` to completion, capturing a panic instead of unwinding further.
pub async fn fault_boundary<F: Future>(work: F) -> Outcome<F::Output> {
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(output) => Outcome::Completed(output),
        Err(payload) => Outcome::Faulted(Fault::from_payload(payload)),
    }
}

/// The fixed response sent in place of a faulted one.
pub fn failure_response() -> Response {
    let mut response = (StatusCode::INTERNAL_SERVER_ERROR, FAILURE_BODY).into_response();
    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

/// Layer installing [`Recovery`] around a service.
#[derive(Debug, Clone)]
pub struct RecoveryLayer {
    failures: RequestCounter,
}

impl RecoveryLayer {
    pub fn new(failures: RequestCounter) -> Self {
        Self { failures }
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = Recovery<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Recovery {
            inner,
            failures: self.failures.clone(),
        }
    }
}

/// Service converting handler faults into `500` responses.
#[derive(Debug, Clone)]
pub struct Recovery<S> {
    inner: S,
    failures: RequestCounter,
}

impl<S> Service<Request<Body>> for Recovery<S>
where
    S: Service<Request<Body>, Response = Response>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let site = FaultSite {
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            failures: self.failures.clone(),
        };
        let call = catch_unwind(AssertUnwindSafe(|| self.inner.call(request)));

        Box::pin(async move {
            let future = match call {
                Ok(future) => future,
                Err(payload) => return Ok(site.recover(Fault::from_payload(payload))),
            };

            match fault_boundary(future).await {
                Outcome::Completed(Ok(response)) => Ok(site.guard_body(response)),
                Outcome::Completed(Err(e)) => Err(e),
                Outcome::Faulted(fault) => Ok(site.recover(fault)),
            }
        })
    }
}

/// Where a fault happened, and the counter it is charged to.
#[derive(Debug, Clone)]
struct FaultSite {
    method: String,
    path: String,
    failures: RequestCounter,
}

impl FaultSite {
    fn report(&self, fault: &Fault, headers_sent: bool) {
        tracing::error!(
            method = %self.method,
            path = %self.path,
            error = %fault.message(),
            headers_sent,
            "Recovered from panic"
        );
        self.failures.increment(&self.method, &self.path);
    }

    fn recover(&self, fault: Fault) -> Response {
        self.report(&fault, false);
        failure_response()
    }

    fn guard_body(self, response: Response) -> Response {
        response.map(|inner| {
            Body::new(GuardedBody {
                inner,
                site: self,
                faulted: false,
            })
        })
    }
}

/// Response body that contains panics raised while it is being polled.
struct GuardedBody {
    inner: Body,
    site: FaultSite,
    faulted: bool,
}

impl HttpBody for GuardedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;
        if this.faulted {
            return Poll::Ready(None);
        }

        let inner = &mut this.inner;
        match catch_unwind(AssertUnwindSafe(|| Pin::new(inner).poll_frame(cx))) {
            Ok(poll) => poll,
            Err(payload) => {
                let fault = Fault::from_payload(payload);
                this.faulted = true;
                this.site.report(&fault, true);
                Poll::Ready(Some(Err(axum::Error::new(format!(
                    "response body aborted: {}",
                    fault.message()
                )))))
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.faulted || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    use axum::http::Method;
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use tower::ServiceExt;

    use crate::routing::Router;

    fn counter() -> RequestCounter {
        let meter = SdkMeterProvider::builder().build().meter("test");
        RequestCounter::new(&meter, "test.panics", "test")
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap()
    }

    async fn ok_handler(_request: Request<Body>) -> Response {
        "fine".into_response()
    }

    async fn panicking_handler(_request: Request<Body>) -> Response {
        panic!("handler exploded")
    }

    async fn streaming_panic_handler(_request: Request<Body>) -> Response {
        let stream = futures_util::stream::poll_fn(
            |_cx| -> Poll<Option<Result<Bytes, Infallible>>> { panic!("mid-stream") },
        );
        Body::from_stream(stream).into_response()
    }

    fn service(failures: &RequestCounter) -> Recovery<crate::routing::RouterService> {
        let mut router = Router::new();
        router
            .register("GET /ok", ok_handler)
            .unwrap()
            .register("GET /panic", panicking_handler)
            .unwrap()
            .register("GET /stream", streaming_panic_handler)
            .unwrap();
        RecoveryLayer::new(failures.clone()).layer(router.into_service())
    }

    #[tokio::test]
    async fn fault_boundary_reports_both_outcomes() {
        assert!(matches!(fault_boundary(async { 7 }).await, Outcome::Completed(7)));
        match fault_boundary(async { panic!("boom {}", 1) }).await {
            Outcome::Faulted(fault) => assert_eq!(fault.message(), "boom 1"),
            Outcome::Completed(()) => panic!("expected a fault"),
        }
    }

    #[tokio::test]
    async fn handler_panic_becomes_500_and_is_counted() {
        let failures = counter();
        let svc = service(&failures);

        let response = svc.clone().oneshot(get("/panic")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], FAILURE_BODY.as_bytes());
        assert_eq!(failures.get("GET", "/panic"), 1);

        let response = svc.oneshot(get("/ok")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(failures.get("GET", "/ok"), 0);
    }

    #[tokio::test]
    async fn synchronous_panic_in_call_is_contained() {
        let failures = counter();
        let inner = tower::service_fn(
            |_request: Request<Body>| -> std::future::Ready<Result<Response, Infallible>> {
                panic!("call exploded")
            },
        );
        let svc = RecoveryLayer::new(failures.clone()).layer(inner);

        let response = svc.oneshot(get("/sync")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failures.get("GET", "/sync"), 1);
    }

    #[tokio::test]
    async fn body_panic_after_headers_aborts_stream_and_is_counted() {
        let failures = counter();
        let response = service(&failures).oneshot(get("/stream")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let collected = axum::body::to_bytes(response.into_body(), usize::MAX).await;
        assert!(collected.is_err());
        assert_eq!(failures.get("GET", "/stream"), 1);
    }

    #[tokio::test]
    async fn concurrent_faults_are_all_counted() {
        let failures = counter();
        let svc = service(&failures);

        let requests = (0..64).map(|_| {
            let svc = svc.clone();
            tokio::spawn(async move { svc.oneshot(get("/panic")).await.unwrap().status() })
        });
        for status in futures_util::future::join_all(requests).await {
            assert_eq!(status.unwrap(), StatusCode::INTERNAL_SERVER_ERROR);
        }
        assert_eq!(failures.get("GET", "/panic"), 64);
    }
}
