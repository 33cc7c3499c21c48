//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (API listener)
//!     → server.rs (HTTP/1.1 + HTTP/2, read/idle timeouts)
//!     → request span (continues incoming traceparent)
//!     → recovery.rs (fault boundary, panic counter)
//!     → write timeout
//!     → routing::Router
//!     → handlers.rs (fixed status JSON, deliberate panic)
//!
//! TCP connection (diagnostics listener)
//!     → diagnostics.rs (/debug/vars)
//! ```

pub mod diagnostics;
pub mod handlers;
pub mod recovery;
pub mod server;

pub use recovery::RecoveryLayer;
pub use server::{build_pipeline, ApiServer, ApiService};
