//! API route handlers.
//!
//! Probe handlers answer with a fixed JSON status and count each success in
//! `http.ok.responses`. `/panic` exists to exercise the recovery path.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

use crate::observability::{HttpInstruments, RequestCounter};
use crate::routing::{RouteError, Router};

/// Routes answered by [`status_ok`].
pub const STATUS_ROUTES: [&str; 3] = ["GET /liveness", "GET /readiness", "GET /"];

/// Route answered by [`panic_handler`].
pub const PANIC_ROUTE: &str = "GET /panic";

/// Build the API router with every route registered.
pub fn api_router(instruments: &HttpInstruments) -> Result<Router, RouteError> {
    let mut router = Router::new();
    for pattern in STATUS_ROUTES {
        let ok_responses = instruments.ok_responses.clone();
        router.register(pattern, move |request: Request<Body>| {
            status_ok(ok_responses.clone(), request)
        })?;
    }
    router.register(PANIC_ROUTE, panic_handler)?;
    Ok(router)
}

/// `200 {"Status":"OK"}`.
pub async fn status_ok(ok_responses: RequestCounter, request: Request<Body>) -> Response {
    ok_responses.increment(request.method().as_str(), request.uri().path());
    (StatusCode::OK, Json(json!({ "Status": "OK" }))).into_response()
}

/// Always panics.
pub async fn panic_handler(_request: Request<Body>) -> Response {
    panic!("This is a panic")
}
