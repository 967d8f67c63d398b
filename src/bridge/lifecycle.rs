//! Socket lifecycle shared by every socket owner
//!
//! ```text
//! Unbound ──bind──▶ Bound ──serve──▶ Serving ──stop / fatal error──▶ Closed
//! ```
//!
//! The state lives in memory only and is the single source of truth for
//! "is this component running". Transitions only move forward; `Closed` is
//! terminal. Closing is idempotent and synchronous, so it can be called from a
//! signal handler or a `Drop` impl.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;

/// Pause after a failed `accept` before trying again
pub const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SocketState {
    Unbound,
    Bound,
    Serving,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<watch::Sender<SocketState>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SocketState::Unbound);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> SocketState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state() == SocketState::Closed
    }

    /// Move forward to `next`. Returns `false` if `next` is not ahead of the
    /// current state.
    pub fn advance(&self, next: SocketState) -> bool {
        self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Close. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        self.advance(SocketState::Closed)
    }

    /// Resolves once the lifecycle reaches `Closed`
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        // the sender lives as long as `self`, so this only fails if it was
        // already dropped, which also means closed
        let _ = rx.wait_for(|state| *state == SocketState::Closed).await;
    }

    /// Sleep for `duration`, cut short by closing. Returns `false` if closed.
    pub async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.closed() => false,
            _ = sleep(duration) => true,
        }
    }
}

/// Held by a serving task and dropped when it exits
#[derive(Debug)]
pub struct ExitGuard {
    _tx: watch::Sender<()>,
}

/// Observes the [`ExitGuard`] of a serving task
#[derive(Debug, Clone)]
pub struct ExitWatch(watch::Receiver<()>);

pub fn exit_signal() -> (ExitGuard, ExitWatch) {
    let (tx, rx) = watch::channel(());
    (ExitGuard { _tx: tx }, ExitWatch(rx))
}

impl ExitWatch {
    /// Resolves once the task dropped its guard
    pub async fn wait(&self) {
        let mut rx = self.0.clone();
        while rx.changed().await.is_ok() {}
    }

    pub fn has_exited(&self) -> bool {
        self.0.has_changed().is_err()
    }
}
