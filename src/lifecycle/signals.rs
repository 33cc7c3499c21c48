//! OS signal handling.
//!
//! # Responsibilities
//! - Register handlers for SIGINT and SIGTERM at startup
//! - Report which signal asked the service to stop
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - Handlers are registered before listeners open so an early signal is not lost
//! - Non-Unix targets only observe Ctrl+C

use std::fmt;
use std::io;

/// Why shutdown began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    /// Requested programmatically (tests, embedding).
    Requested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownReason::Interrupt => "SIGINT",
            ShutdownReason::Terminate => "SIGTERM",
            ShutdownReason::Requested => "requested",
        };
        f.write_str(name)
    }
}

/// Registered process shutdown signals.
#[cfg(unix)]
#[derive(Debug)]
pub struct ShutdownSignals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ShutdownSignals {
    pub fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the next shutdown signal.
    pub async fn recv(&mut self) -> ShutdownReason {
        tokio::select! {
            _ = self.interrupt.recv() => ShutdownReason::Interrupt,
            _ = self.terminate.recv() => ShutdownReason::Terminate,
        }
    }
}

/// Registered process shutdown signals.
#[cfg(not(unix))]
#[derive(Debug)]
pub struct ShutdownSignals {
    _private: (),
}

#[cfg(not(unix))]
impl ShutdownSignals {
    pub fn register() -> io::Result<Self> {
        Ok(Self { _private: () })
    }

    /// Wait for the next shutdown signal.
    pub async fn recv(&mut self) -> ShutdownReason {
        match tokio::signal::ctrl_c().await {
            Ok(()) => ShutdownReason::Interrupt,
            Err(e) => {
                tracing::error!(error = %e, "Ctrl+C handler failed; shutting down");
                ShutdownReason::Interrupt
            }
        }
    }
}
