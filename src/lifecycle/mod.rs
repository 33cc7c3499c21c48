//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Start telemetry → Install logging → Register signals
//!
//! Service (service.rs), state tracked by state.rs:
//!     Init → Starting (bind listeners) → Running
//!          → Draining (signal: stop accept, finish in-flight)
//!          → Stopped (flush telemetry)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → begin graceful shutdown
//!
//! Shutdown (shutdown.rs):
//!     trigger → every listener and connection task observes it
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then telemetry, then listeners
//! - Ordered shutdown: stop accept, drain, force close, flush telemetry
//! - Shutdown has timeout: forced close after the drain deadline

pub mod service;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use service::{LifecycleError, RunningService, ServiceLifecycle, ShutdownReport};
pub use shutdown::{Shutdown, ShutdownListener};
pub use signals::{ShutdownReason, ShutdownSignals};
pub use state::{LifecycleState, StateCell};
