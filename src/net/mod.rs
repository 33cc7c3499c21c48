//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Configured address
//!     → listener.rs (bind, accept, accept-error classification)
//!     → connection.rs (connection IDs, open count, request activity)
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - Binding happens before any traffic is served so bind failures surface at startup
//! - Each connection tracked for graceful shutdown and idle expiry

pub mod connection;
pub mod listener;

pub use connection::{ConnectionActivity, ConnectionGuard, ConnectionId, ConnectionTracker, RequestGuard};
pub use listener::{Listener, ListenerError};
