//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Store handlers under exact `"METHOD /path"` patterns
//! - Look up the handler for a request with a direct map lookup
//! - Tag the dispatched request with its matched pattern
//!
//! # Design Decisions
//! - Immutable once turned into a service (shared via `Arc`, no locks)
//! - No wildcard, prefix or trailing-slash matching
//! - Known path with an unregistered method is `405` with `Allow`, unknown path is `404`
//! - `HEAD` falls back to the `GET` handler of the same path

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::{header, HeaderValue, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Boxed future returned by every handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A request handler. Implemented for any `Fn(Request) -> impl Future<Output = Response>`.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request<Body>) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request<Body>) -> HandlerFuture {
        Box::pin(self(request))
    }
}

/// The pattern a request was dispatched under, stored in its extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedRoute(Arc<str>);

impl MatchedRoute {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Error type for route registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("invalid route pattern {0:?}: expected \"METHOD /path\"")]
    InvalidPattern(String),

    #[error("route pattern {0:?} is already registered")]
    Duplicate(String),
}

struct Route {
    pattern: Arc<str>,
    handler: Arc<dyn Handler>,
}

/// Exact-match router, keyed by path then method.
#[derive(Default)]
pub struct Router {
    routes: HashMap<String, HashMap<Method, Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under a pattern such as `"GET /liveness"`.
    pub fn register<H: Handler>(&mut self, pattern: &str, handler: H) -> Result<&mut Self, RouteError> {
        let (method, path) = parse_pattern(pattern)?;
        let normalized: Arc<str> = format!("{method} {path}").into();

        let methods = self.routes.entry(path).or_default();
        if methods.contains_key(&method) {
            return Err(RouteError::Duplicate(normalized.to_string()));
        }
        methods.insert(
            method,
            Route {
                pattern: normalized,
                handler: Arc::new(handler),
            },
        );
        Ok(self)
    }

    /// Registered patterns, sorted.
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .routes
            .values()
            .flat_map(|methods| methods.values().map(|route| route.pattern.to_string()))
            .collect();
        patterns.sort();
        patterns
    }

    /// Route `request` to its handler.
    ///
    /// The matched pattern is recorded as `http.route` on the current span
    /// and inserted into the request extensions as [`MatchedRoute`].
    pub fn dispatch(&self, mut request: Request<Body>) -> HandlerFuture {
        let Some(methods) = self.routes.get(request.uri().path()) else {
            return Box::pin(std::future::ready(not_found()));
        };

        let route = methods.get(request.method()).or_else(|| {
            if request.method() == Method::HEAD {
                methods.get(&Method::GET)
            } else {
                None
            }
        });

        match route {
            Some(route) => {
                tracing::Span::current().record("http.route", &*route.pattern);
                request
                    .extensions_mut()
                    .insert(MatchedRoute(Arc::clone(&route.pattern)));
                route.handler.call(request)
            }
            None => {
                let allow = allowed_methods(methods);
                Box::pin(std::future::ready(method_not_allowed(&allow)))
            }
        }
    }

    /// Freeze the router into a cloneable `tower` service.
    pub fn into_service(self) -> RouterService {
        RouterService {
            router: Arc::new(self),
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("patterns", &self.patterns())
            .finish()
    }
}

/// `tower::Service` adapter over a frozen [`Router`].
#[derive(Debug, Clone)]
pub struct RouterService {
    router: Arc<Router>,
}

impl tower::Service<Request<Body>> for RouterService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let response = self.router.dispatch(request);
        Box::pin(async move { Ok(response.await) })
    }
}

fn parse_pattern(pattern: &str) -> Result<(Method, String), RouteError> {
    let invalid = || RouteError::InvalidPattern(pattern.to_string());

    let (method, path) = pattern.trim().split_once(' ').ok_or_else(invalid)?;
    let path = path.trim();
    if !path.starts_with('/') || path.contains(char::is_whitespace) {
        return Err(invalid());
    }
    let method = Method::from_bytes(method.as_bytes()).map_err(|_| invalid())?;
    Ok((method, path.to_string()))
}

fn allowed_methods(methods: &HashMap<Method, Route>) -> String {
    let mut allow: Vec<&str> = methods.keys().map(Method::as_str).collect();
    if methods.contains_key(&Method::GET) && !methods.contains_key(&Method::HEAD) {
        allow.push(Method::HEAD.as_str());
    }
    allow.sort_unstable();
    allow.join(", ")
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 page not found").into_response()
}

fn method_not_allowed(allow: &str) -> Response {
    let mut response = (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed").into_response();
    if let Ok(value) = HeaderValue::from_str(allow) {
        response.headers_mut().insert(header::ALLOW, value);
    }
    response
}
