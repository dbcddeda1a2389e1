//! A shared, set-once cancellation flag.

use std::sync::{Arc, OnceLock};
use tokio::sync::Notify;
use tracing::debug;

/// Cooperative cancellation shared between a run and whoever may stop it.
///
/// The first reason given is kept; later calls to [`cancel`](Self::cancel)
/// are ignored. Clones observe the same flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
    state: Arc<State>,
}

#[derive(Default)]
struct State {
    reason: OnceLock<String>,
    waiters: Notify,
}

impl CancellationToken {
    /// An uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels with `reason` and wakes every [`cancelled`](Self::cancelled)
    /// waiter. No-op once cancelled.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self.state.reason.set(reason.into()).is_ok() {
            debug!(reason = ?self.state.reason.get(), "Cancellation requested");
            self.state.waiters.notify_waiters();
        }
    }

    /// Checked between children.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.reason.get().is_some()
    }

    /// The reason passed to the first `cancel`.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.state.reason.get().cloned()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.state.waiters.notified();
            tokio::pin!(notified);
            // Registered before the flag check so a racing cancel still wakes us.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.state.reason.get() {
            Some(reason) => write!(f, "CancellationToken(cancelled: {reason})"),
            None => write!(f, "CancellationToken(active)"),
        }
    }
}
