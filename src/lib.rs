//! Health-check HTTP service with an OTLP telemetry pipeline.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod routing;

pub use config::ServiceConfig;
pub use lifecycle::{RunningService, ServiceLifecycle, ShutdownReport};
