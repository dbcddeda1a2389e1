//! Worker response queue to completion pipeline.

use std::sync::Arc;
use tracing::{error, info, warn};

use super::poll_loop::poll_until_cancelled;
use super::DispatchSettings;
use crate::cancellation::CancellationToken;
use crate::collaborators::{QueueClient, QueueMessage};
use crate::errors::OrchestratorError;
use crate::model::BuildResponse;
use crate::pipelines::CompletionPipeline;

/// Runs the completion pipeline per worker response.
pub struct CompletionPoller {
    queues: Arc<dyn QueueClient>,
    pipeline: Arc<CompletionPipeline>,
    settings: DispatchSettings,
}

impl CompletionPoller {
    /// Creates a poller.
    #[must_use]
    pub fn new(
        queues: Arc<dyn QueueClient>,
        pipeline: Arc<CompletionPipeline>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            queues,
            pipeline,
            settings,
        }
    }

    /// Handles one message. Returns true if it was acknowledged.
    ///
    /// The run gets its own token, so shutdown never stops it between nodes.
    async fn handle(&self, message: &QueueMessage) -> Result<bool, OrchestratorError> {
        let queue = self.settings.response_queue.as_str();
        let response: BuildResponse = match serde_json::from_str(&message.body) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    queue,
                    message_id = %message.id,
                    dequeue_count = message.dequeue_count,
                    error = %err,
                    "Malformed build response; leaving for redelivery"
                );
                return Ok(false);
            }
        };

        let outcome = self
            .pipeline
            .run(response, &CancellationToken::new())
            .await?;
        if !outcome.is_settled() {
            warn!(
                queue,
                job_id = %outcome.job_id,
                dequeue_count = message.dequeue_count,
                "Completion did not settle; leaving response for redelivery"
            );
            return Ok(false);
        }

        self.queues.delete(queue, message).await?;
        Ok(true)
    }

    /// Receives one batch and processes each response in turn.
    ///
    /// # Errors
    ///
    /// Returns an error only if the receive itself fails; per-message
    /// failures are logged and the message is left for redelivery.
    pub async fn poll_once(&self) -> Result<usize, OrchestratorError> {
        self.poll_batch(&CancellationToken::new()).await
    }

    /// One poll that starts no further run once `cancellation` fires. The
    /// remaining messages stay queued.
    async fn poll_batch(&self, cancellation: &CancellationToken) -> Result<usize, OrchestratorError> {
        let messages = self
            .queues
            .receive(&self.settings.response_queue, self.settings.max_messages)
            .await?;

        let mut acknowledged = 0;
        for (index, message) in messages.iter().enumerate() {
            if cancellation.is_cancelled() {
                info!(
                    left = messages.len() - index,
                    "Shutdown requested; leaving remaining responses for redelivery"
                );
                break;
            }
            match self.handle(message).await {
                Ok(true) => acknowledged += 1,
                Ok(false) => {}
                Err(err) => error!(
                    message_id = %message.id,
                    error = %err,
                    "Build response processing failed"
                ),
            }
        }
        Ok(acknowledged)
    }

    /// Polls until cancelled.
    pub async fn run(self, cancellation: CancellationToken) {
        let poll_interval = self.settings.poll_interval;
        let error_delay = self.settings.error_delay;
        let stop = cancellation.clone();
        poll_until_cancelled(
            "completion_poller",
            poll_interval,
            error_delay,
            cancellation,
            || self.poll_batch(&stop),
        )
        .await;
    }
}

impl std::fmt::Debug for CompletionPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionPoller")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
