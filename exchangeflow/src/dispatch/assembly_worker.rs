//! Channel to assembly pipeline.

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};

use crate::cancellation::CancellationToken;
use crate::model::AssemblyRequest;
use crate::pipelines::AssemblyPipeline;

/// Drains the request channel, running assembly per request.
///
/// At most `concurrency` runs are in flight. Shutdown stops taking new
/// requests; runs already started finish with their own token.
pub struct AssemblyWorker {
    pipeline: Arc<AssemblyPipeline>,
    receiver: mpsc::Receiver<AssemblyRequest>,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl AssemblyWorker {
    /// Creates a worker. A concurrency of 0 is treated as 1.
    #[must_use]
    pub fn new(
        pipeline: Arc<AssemblyPipeline>,
        receiver: mpsc::Receiver<AssemblyRequest>,
        concurrency: usize,
    ) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            pipeline,
            receiver,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    async fn assemble(pipeline: &AssemblyPipeline, request: AssemblyRequest) {
        let job_id = request.job_id.clone();
        match pipeline.run(request, &CancellationToken::new()).await {
            Ok(outcome) => info!(
                job_id = %job_id,
                state = %outcome.projection.state,
                status = %outcome.status,
                "Assembly request processed"
            ),
            Err(err) => error!(job_id = %job_id, error = %err, "Assembly request failed"),
        }
    }

    /// Runs until cancelled or the channel closes, then waits for in-flight
    /// runs.
    pub async fn run(mut self, cancellation: CancellationToken) {
        info!(concurrency = self.concurrency, "Assembly worker started");

        loop {
            let request = tokio::select! {
                () = cancellation.cancelled() => break,
                request = self.receiver.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            let pipeline = Arc::clone(&self.pipeline);
            tokio::spawn(async move {
                Self::assemble(&pipeline, request).await;
                drop(permit);
            });
        }

        let total = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        if self.permits.acquire_many(total).await.is_err() {
            error!("Assembly permits closed while draining");
        }
        info!("Assembly worker stopped");
    }
}

impl std::fmt::Debug for AssemblyWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblyWorker")
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}
