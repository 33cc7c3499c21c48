//! Lifecycle state tracking.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Where the service is in its lifecycle. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    Init,
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Init => "init",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Shared, observable lifecycle state.
#[derive(Debug, Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<LifecycleState>>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(LifecycleState::Init);
        Self { tx: Arc::new(tx) }
    }

    pub fn watch(&self) -> watch::Receiver<LifecycleState> {
        self.tx.subscribe()
    }

    /// Move to `next`. Returns `false` (and changes nothing) if `next` is not
    /// ahead of the current state.
    pub fn advance(&self, next: LifecycleState) -> bool {
        let mut from = next;
        let moved = self.tx.send_if_modified(|current| {
            if next > *current {
                from = *current;
                *current = next;
                true
            } else {
                false
            }
        });
        if moved {
            tracing::debug!(from = %from, to = %next, "Lifecycle transition");
        }
        moved
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
