//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, path)
//!     → router.rs (exact lookup by path, then method)
//!     → record matched pattern on the request span, insert MatchedRoute
//!     → Handler, or 404 / 405
//!
//! Route registration (at startup):
//!     "METHOD /path" patterns → parsed and validated
//!     → frozen into an immutable RouterService
//! ```
//!
//! # Design Decisions
//! - Patterns registered at startup, immutable at runtime
//! - Deterministic: same input always matches the same route
//! - Attribution only; the router performs no business logic

pub mod router;

pub use router::{Handler, HandlerFuture, MatchedRoute, RouteError, Router, RouterService};
