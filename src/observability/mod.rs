//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! telemetry.rs (OTLP exporters → batching tracer provider, periodic meter provider)
//!     → tracer handle → logging.rs (tracing-opentelemetry bridge)
//!     → meter handle  → metrics.rs (request counters)
//!
//! Every log record:
//!     → trace_context.rs (attach trace_id / span_id when a valid span is current)
//!     → fmt sink (JSON or text on stdout)
//! ```
//!
//! # Design Decisions
//! - Handles are passed explicitly through constructors; no global providers
//! - Counters are the only state written by every request, and use atomics
//! - Shutdown of the pipeline is the last step before process exit

pub mod logging;
pub mod metrics;
pub mod telemetry;
pub mod trace_context;

pub use metrics::{HttpInstruments, RequestCounter};
pub use telemetry::{TelemetryError, TelemetryPipeline, TelemetryResource, BUILD_VERSION};
pub use trace_context::{TraceAwareFormat, TraceIds};
