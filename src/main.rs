//! Health-check service.
//!
//! # Architecture Overview
//!
//! ```text
//!                        ┌──────────────────────────────────────────────┐
//!                        │                HEALTH SERVICE                │
//!                        │                                              │
//!   Client Request       │  ┌────────┐   ┌──────────┐   ┌──────────┐    │
//!   ─────────────────────┼─▶│  net   │──▶│  http    │──▶│ routing  │    │
//!                        │  │listener│   │ pipeline │   │  router  │    │
//!                        │  └────────┘   │ recovery │   └────┬─────┘    │
//!                        │               └──────────┘        │          │
//!   Client Response      │                                   ▼          │
//!   ◀────────────────────┼────────────────────────────── handlers       │
//!                        │                                              │
//!   Operator             │  ┌─────────────┐                             │
//!   ─────────────────────┼─▶│ diagnostics │  /debug/vars                │
//!                        │  └─────────────┘                             │
//!                        │  ┌────────────────────────────────────────┐  │
//!                        │  │ config · observability · lifecycle     │  │
//!                        │  └────────────────────────────────────────┘  │
//!                        └──────────────────────────────────────────────┘
//!                                         │ OTLP/gRPC
//!                                         ▼
//!                                     Collector
//! ```
//!
//! Exit codes: `0` clean shutdown, `1` fatal error, `2` drain timed out.

use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    health_service::lifecycle::startup::bootstrap().await
}
