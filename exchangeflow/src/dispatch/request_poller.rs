//! Inbound request queue to bounded channel.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::poll_loop::poll_until_cancelled;
use super::DispatchSettings;
use crate::cancellation::CancellationToken;
use crate::collaborators::QueueClient;
use crate::errors::OrchestratorError;
use crate::model::AssemblyRequest;

/// Moves assembly requests from the request queue into the channel.
pub struct RequestPoller {
    queues: Arc<dyn QueueClient>,
    settings: DispatchSettings,
    sender: mpsc::Sender<AssemblyRequest>,
}

impl RequestPoller {
    /// Creates a poller feeding `sender`.
    #[must_use]
    pub fn new(
        queues: Arc<dyn QueueClient>,
        settings: DispatchSettings,
        sender: mpsc::Sender<AssemblyRequest>,
    ) -> Self {
        Self {
            queues,
            settings,
            sender,
        }
    }

    /// Receives one batch and hands every decodable request off.
    ///
    /// Blocks while the channel is full. A message is deleted only after its
    /// request is in the channel; malformed messages are left for
    /// redelivery.
    ///
    /// # Errors
    ///
    /// Returns an error if the queue fails or the channel is closed.
    pub async fn poll_once(&self) -> Result<usize, OrchestratorError> {
        self.poll_batch(&CancellationToken::new()).await
    }

    /// One poll that gives up waiting for channel space once `cancellation`
    /// fires. The abandoned request's message stays queued.
    async fn poll_batch(&self, cancellation: &CancellationToken) -> Result<usize, OrchestratorError> {
        let queue = self.settings.request_queue.as_str();
        let messages = self
            .queues
            .receive(queue, self.settings.max_messages)
            .await?;

        let mut handed_off = 0;
        for message in messages {
            if cancellation.is_cancelled() {
                break;
            }
            let request: AssemblyRequest = match serde_json::from_str(&message.body) {
                Ok(request) => request,
                Err(err) => {
                    warn!(
                        queue,
                        message_id = %message.id,
                        dequeue_count = message.dequeue_count,
                        error = %err,
                        "Malformed assembly request; leaving for redelivery"
                    );
                    continue;
                }
            };

            let job_id = request.job_id.clone();
            let sent = tokio::select! {
                () = cancellation.cancelled() => None,
                sent = self.sender.send(request) => Some(sent),
            };
            match sent {
                Some(Ok(())) => {}
                Some(Err(_)) => {
                    return Err(OrchestratorError::ChannelClosed("assembly requests".to_string()));
                }
                None => {
                    debug!(queue, job_id = %job_id, "Shutdown while waiting for channel space; request left queued");
                    break;
                }
            }
            self.queues.delete(queue, &message).await?;
            debug!(queue, job_id = %job_id, "Assembly request handed off");
            handed_off += 1;
        }
        Ok(handed_off)
    }

    /// Polls until cancelled.
    pub async fn run(self, cancellation: CancellationToken) {
        let poll_interval = self.settings.poll_interval;
        let error_delay = self.settings.error_delay;
        let stop = cancellation.clone();
        poll_until_cancelled(
            "request_poller",
            poll_interval,
            error_delay,
            cancellation,
            || self.poll_batch(&stop),
        )
        .await;
    }
}

impl std::fmt::Debug for RequestPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPoller")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
