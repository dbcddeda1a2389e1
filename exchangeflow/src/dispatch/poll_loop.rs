//! The loop shape shared by both pollers.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::cancellation::CancellationToken;
use crate::errors::OrchestratorError;

/// Sleeps for `duration`. Returns false if cancelled first.
pub(super) async fn pause(duration: Duration, cancellation: &CancellationToken) -> bool {
    tokio::select! {
        () = cancellation.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

/// Calls `poll` until cancelled.
///
/// `poll` returns how many messages it handled; an empty poll waits
/// `poll_interval`, an error is logged and waits `error_delay`.
///
/// Cancellation is observed between polls and during the waits. A poll in
/// progress always runs to completion, so `poll` must watch the token
/// itself wherever it may block.
pub(super) async fn poll_until_cancelled<F, Fut>(
    name: &'static str,
    poll_interval: Duration,
    error_delay: Duration,
    cancellation: CancellationToken,
    mut poll: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<usize, OrchestratorError>>,
{
    info!(
        poller = name,
        poll_interval_ms = u64::try_from(poll_interval.as_millis()).unwrap_or(u64::MAX),
        "Poller started"
    );

    while !cancellation.is_cancelled() {
        let delay = match poll().await {
            Ok(0) => Some(poll_interval),
            Ok(handled) => {
                debug!(poller = name, handled, "Poll cycle handled messages");
                None
            }
            Err(err) => {
                error!(poller = name, error = %err, "Poll cycle failed");
                Some(error_delay)
            }
        };

        if let Some(delay) = delay {
            if !pause(delay, &cancellation).await {
                break;
            }
        }
    }

    info!(poller = name, reason = ?cancellation.reason(), "Poller stopped");
}
