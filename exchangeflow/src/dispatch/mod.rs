//! Queue-driven dispatch.
//!
//! Three long-lived loops:
//!
//! - [`RequestPoller`] moves assembly requests from the inbound queue into
//!   a bounded channel, deleting each message only after the hand-off.
//! - [`AssemblyWorker`] drains the channel and runs the assembly pipeline.
//! - [`CompletionPoller`] runs the completion pipeline per worker response
//!   and deletes the message once the run settles.
//!
//! A full channel blocks the request poller; that is the only backpressure.

mod assembly_worker;
mod completion_poller;
mod poll_loop;
mod request_poller;
mod settings;

pub use assembly_worker::AssemblyWorker;
pub use completion_poller::CompletionPoller;
pub use request_poller::RequestPoller;
pub use settings::DispatchSettings;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cancellation::CancellationToken;
use crate::errors::CollaboratorError;
use crate::pipelines::{AssemblyPipeline, CompletionPipeline, PipelineServices};

/// Join handles for the three dispatch loops.
#[derive(Debug)]
pub struct Dispatcher {
    request_poller: JoinHandle<()>,
    assembly_worker: JoinHandle<()>,
    completion_poller: JoinHandle<()>,
}

impl Dispatcher {
    /// Creates the inbound queues and spawns every loop.
    ///
    /// The loops stop once `cancellation` fires.
    pub async fn spawn(
        services: Arc<PipelineServices>,
        settings: DispatchSettings,
        cancellation: CancellationToken,
    ) -> Result<Self, CollaboratorError> {
        services.ensure_storage().await?;
        services
            .queues
            .create_if_not_exists(&settings.request_queue)
            .await?;
        services
            .queues
            .create_if_not_exists(&settings.response_queue)
            .await?;

        let (sender, receiver) = mpsc::channel(settings.channel_capacity.max(1));
        let assembly = Arc::new(AssemblyPipeline::new(Arc::clone(&services)));
        let completion = Arc::new(CompletionPipeline::new(Arc::clone(&services)));

        let poller = RequestPoller::new(Arc::clone(&services.queues), settings.clone(), sender);
        let worker = AssemblyWorker::new(assembly, receiver, settings.assembly_concurrency);
        let completions = CompletionPoller::new(Arc::clone(&services.queues), completion, settings);

        info!("Starting dispatch loops");
        Ok(Self {
            request_poller: tokio::spawn(poller.run(cancellation.clone())),
            assembly_worker: tokio::spawn(worker.run(cancellation.clone())),
            completion_poller: tokio::spawn(completions.run(cancellation)),
        })
    }

    /// Waits for every loop to stop.
    pub async fn join(self) {
        for (name, handle) in [
            ("request_poller", self.request_poller),
            ("assembly_worker", self.assembly_worker),
            ("completion_poller", self.completion_poller),
        ] {
            if let Err(err) = handle.await {
                error!(task = name, error = %err, "Dispatch task ended abnormally");
            }
        }
        info!("Dispatch loops stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{
        download_json, upload_json, CatalogChanges, QueueClient, TableStore,
    };
    use crate::core::NodeStatus;
    use crate::model::{
        summary_blob_key, AssemblyRequest, Build, BuildNodeStatus, BuildRequest, BuildResponse,
        DataStandard, Job, JobState, WorkerExitCode,
    };
    use crate::testing::InMemoryEnvironment;
    use chrono::Utc;
    use std::time::Duration;

    fn fast_settings() -> DispatchSettings {
        DispatchSettings {
            poll_interval: Duration::from_millis(5),
            error_delay: Duration::from_millis(5),
            ..DispatchSettings::default()
        }
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..400 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_request_to_completion_through_queues() {
        let env = InMemoryEnvironment::new();
        let settings = fast_settings();
        let cancel = CancellationToken::new();
        env.catalog
            .push(Ok(CatalogChanges::changed(vec!["GB1".to_string()], Utc::now())));

        let dispatcher = Dispatcher::spawn(
            Arc::new(env.services()),
            settings.clone(),
            cancel.clone(),
        )
        .await
        .unwrap();

        let request = AssemblyRequest {
            job_id: "job-1".to_string(),
            data_standard: DataStandard::S57,
            products: vec![],
            filter: None,
            correlation_id: "corr".to_string(),
        };
        env.queues
            .enqueue(&settings.request_queue, serde_json::to_string(&request).unwrap())
            .await
            .unwrap();

        // Act as the builder worker.
        let queues = Arc::clone(&env.queues);
        wait_for(|| {
            let queues = Arc::clone(&queues);
            async move { queues.len("s57-build-requests") == 1 }
        })
        .await;
        let message = env.queues.receive("s57-build-requests", 1).await.unwrap().remove(0);
        env.queues.delete("s57-build-requests", &message).await.unwrap();
        let build_request: BuildRequest = serde_json::from_str(&message.body).unwrap();
        let mut build: Build = download_json(env.blobs.as_ref(), &build_request.workspace_key)
            .await
            .unwrap();
        build.node_statuses = vec![BuildNodeStatus::new("build", NodeStatus::Succeeded, Utc::now())];
        upload_json(env.blobs.as_ref(), &summary_blob_key("job-1"), &build)
            .await
            .unwrap();
        let response = BuildResponse {
            job_id: "job-1".to_string(),
            batch_id: Some(build_request.batch_id),
            data_standard: Some(DataStandard::S57),
            exit_code: WorkerExitCode::Success,
        };
        env.queues
            .enqueue(&settings.response_queue, serde_json::to_string(&response).unwrap())
            .await
            .unwrap();

        let jobs = Arc::clone(&env.jobs);
        wait_for(|| {
            let jobs = Arc::clone(&jobs);
            async move {
                jobs.get("job-1", Job::ROW_KEY)
                    .await
                    .is_ok_and(|job| job.state == JobState::Succeeded)
            }
        })
        .await;

        let queues = Arc::clone(&env.queues);
        let response_queue = settings.response_queue.clone();
        wait_for(|| {
            let queues = Arc::clone(&queues);
            let response_queue = response_queue.clone();
            async move { queues.len(&response_queue) == 0 }
        })
        .await;
        assert_eq!(env.queues.len(&settings.request_queue), 0);

        cancel.cancel("test finished");
        tokio::time::timeout(Duration::from_secs(5), dispatcher.join())
            .await
            .unwrap();
    }
}
