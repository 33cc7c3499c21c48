//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! process environment
//!     → loader.rs (lookup each key, fall back to its default)
//!     → duration.rs (parse timeout values)
//!     → validation.rs (listen address checks)
//!     → ServiceConfig (validated, immutable)
//!     → handed by value to the lifecycle, which owns it for the process lifetime
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload path
//! - Absent keys fall back to documented defaults silently
//! - Present but malformed values fail the whole load, naming the key
//! - Loading goes through a lookup function so callers can supply a fake environment

pub mod duration;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::{LogConfig, LogFormat, ServiceConfig};
