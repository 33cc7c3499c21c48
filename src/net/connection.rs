//! Connection lifecycle tracking.
//!
//! # Responsibilities
//! - Assign connection IDs for tracing
//! - Count open connections for diagnostics
//! - Track per-connection request activity so idle connections can be closed

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

/// Identifier for a connection, unique per tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Counts open connections on one server.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    active: Arc<AtomicU64>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new open connection. The returned guard closes it on drop.
    pub fn track(&self) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard {
            active: Arc::clone(&self.active),
            id: ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
            activity: ConnectionActivity::new(),
        }
    }

    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::SeqCst)
    }
}

/// Guard held by a connection task for the connection's lifetime.
#[derive(Debug)]
pub struct ConnectionGuard {
    active: Arc<AtomicU64>,
    id: ConnectionId,
    activity: ConnectionActivity,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn activity(&self) -> &ConnectionActivity {
        &self.activity
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(connection_id = %self.id, "Connection closed");
    }
}

/// Request activity on a single connection.
///
/// A connection only counts as idle between requests: the idle clock starts
/// when a request finishes and stops while another one is in flight. Before
/// the first request completes the header read timeout applies instead.
#[derive(Debug, Clone)]
pub struct ConnectionActivity {
    state: Arc<ActivityState>,
}

#[derive(Debug)]
struct ActivityState {
    opened: Instant,
    in_flight: AtomicUsize,
    /// Milliseconds since `opened` when the last request finished,
    /// `NEVER_SERVED` until one has.
    last_active_ms: AtomicU64,
    released: Notify,
}

const NEVER_SERVED: u64 = u64::MAX;

impl ConnectionActivity {
    fn new() -> Self {
        Self {
            state: Arc::new(ActivityState {
                opened: Instant::now(),
                in_flight: AtomicUsize::new(0),
                last_active_ms: AtomicU64::new(NEVER_SERVED),
                released: Notify::new(),
            }),
        }
    }

    /// Mark a request as started; it ends when the guard drops.
    pub fn begin(&self) -> RequestGuard {
        self.state.in_flight.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            activity: self.clone(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    /// How long the connection has been idle between requests.
    ///
    /// `None` while a request is in flight or before the first one finished.
    pub fn idle_for(&self) -> Option<Duration> {
        if self.in_flight() > 0 {
            return None;
        }
        match self.state.last_active_ms.load(Ordering::SeqCst) {
            NEVER_SERVED => None,
            last => Some(
                self.state
                    .opened
                    .elapsed()
                    .saturating_sub(Duration::from_millis(last)),
            ),
        }
    }

    /// Resolve once the connection has been idle for `timeout`.
    pub async fn idle_expired(&self, timeout: Duration) {
        loop {
            let released = self.state.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            match self.idle_for() {
                Some(idle) if idle >= timeout => return,
                Some(idle) => tokio::time::sleep(timeout - idle).await,
                None => released.await,
            }
        }
    }

    fn finish(&self) {
        let elapsed = self.state.opened.elapsed().as_millis() as u64;
        self.state
            .last_active_ms
            .store(elapsed.min(NEVER_SERVED - 1), Ordering::SeqCst);
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state.released.notify_waiters();
    }
}

/// Marks one in-flight request.
#[derive(Debug)]
pub struct RequestGuard {
    activity: ConnectionActivity,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.activity.finish();
    }
}
