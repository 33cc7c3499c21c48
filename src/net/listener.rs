//! TCP listener binding and accept-error classification.
//!
//! # Responsibilities
//! - Bind to a configured `host:port` address
//! - Accept incoming TCP connections
//! - Tell transient accept errors apart from fatal ones
//!
//! # Design Decisions
//! - An empty host (`":3000"`) binds every interface
//! - Port `0` is allowed; the chosen port is read back via [`Listener::local_addr`]
//! - Per-connection errors (reset, aborted) and descriptor exhaustion are
//!   transient; anything else ends the accept loop

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

/// Host to bind when the configured address leaves it empty.
const UNSPECIFIED_HOST: &str = "0.0.0.0";

/// Upper bound on the pause after a transient accept error.
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// Expand an address with an empty host into one that binds every interface.
pub fn resolve_bind_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("{UNSPECIFIED_HOST}{address}")
    } else {
        address.to_string()
    }
}

/// True when an accept error only affects the connection being accepted.
pub fn is_transient(error: &io::Error) -> bool {
    // EMFILE / ENFILE: out of descriptors, recovers once connections close.
    if matches!(error.raw_os_error(), Some(23) | Some(24)) {
        return true;
    }
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Pause to take after the `attempt`-th consecutive transient accept error.
pub fn accept_backoff(attempt: u32) -> Duration {
    let delay = Duration::from_millis(5).saturating_mul(1u32 << attempt.min(8));
    delay.min(MAX_ACCEPT_BACKOFF)
}

/// A bound TCP listener.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind to `address` (`host:port`, host optional).
    pub async fn bind(address: &str) -> Result<Self, ListenerError> {
        let resolved = resolve_bind_address(address);
        let bind_error = |source| ListenerError::Bind {
            address: address.to_string(),
            source,
        };

        let inner = TcpListener::bind(&resolved).await.map_err(bind_error)?;
        let local_addr = inner.local_addr().map_err(bind_error)?;

        tracing::info!(address = %local_addr, "Listener bound");

        Ok(Self { inner, local_addr })
    }

    /// Accept the next connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, peer) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tracing::trace!(peer_addr = %peer, "Connection accepted");
        Ok((stream, peer))
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Hand the socket to a server that runs its own accept loop.
    pub fn into_inner(self) -> TcpListener {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_host_binds_all_interfaces() {
        assert_eq!(resolve_bind_address(":3000"), "0.0.0.0:3000");
        assert_eq!(resolve_bind_address("127.0.0.1:3000"), "127.0.0.1:3000");
        assert_eq!(resolve_bind_address("[::1]:3000"), "[::1]:3000");
    }

    #[test]
    fn transient_errors_are_classified() {
        assert!(is_transient(&io::Error::from(io::ErrorKind::ConnectionAborted)));
        assert!(is_transient(&io::Error::from_raw_os_error(24)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        assert_eq!(accept_backoff(0), Duration::from_millis(5));
        assert_eq!(accept_backoff(1), Duration::from_millis(10));
        assert_eq!(accept_backoff(30), MAX_ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let listener = Listener::bind("127.0.0.1:0").await.unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn occupied_port_is_a_bind_error() {
        let first = Listener::bind("127.0.0.1:0").await.unwrap();
        let taken = first.local_addr().to_string();

        let err = Listener::bind(&taken).await.unwrap_err();
        assert!(matches!(err, ListenerError::Bind { ref address, .. } if *address == taken));
    }
}
