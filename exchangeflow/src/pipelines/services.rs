//! Collaborator handles shared by every pipeline node.

use chrono::Duration;
use std::sync::Arc;

use crate::collaborators::{BlobStore, CatalogClient, FileStoreClient, QueueClient, TableStore};
use crate::core::ExecutionOptions;
use crate::errors::CollaboratorError;
use crate::events::{EventSink, LoggingEventSink};
use crate::model::{BatchRecord, BuildStatusRecord, CatalogCheckpoint, Job};
use crate::standards::StandardRegistry;

/// Everything a pipeline node may call out to.
#[derive(Clone)]
pub struct PipelineServices {
    /// Job rows.
    pub jobs: Arc<dyn TableStore<Job>>,
    /// Build status rows.
    pub build_statuses: Arc<dyn TableStore<BuildStatusRecord>>,
    /// Catalog checkpoint rows.
    pub checkpoints: Arc<dyn TableStore<CatalogCheckpoint>>,
    /// Batch ledger rows.
    pub batches: Arc<dyn TableStore<BatchRecord>>,
    /// Build descriptions and worker summaries.
    pub blobs: Arc<dyn BlobStore>,
    /// Worker queues.
    pub queues: Arc<dyn QueueClient>,
    /// Upstream catalog.
    pub catalog: Arc<dyn CatalogClient>,
    /// External file store.
    pub file_store: Arc<dyn FileStoreClient>,
    /// Per-standard profiles.
    pub standards: StandardRegistry,
    /// Global execution options for every run.
    pub execution: ExecutionOptions,
    /// How long an allocated batch lives before it may be expired.
    pub batch_expiry: Duration,
    /// Receives node hook events.
    pub event_sink: Arc<dyn EventSink>,
}

impl PipelineServices {
    /// Default batch lifetime.
    pub const DEFAULT_BATCH_EXPIRY_HOURS: i64 = 24 * 7;

    /// Wires collaborators with default profiles, options and expiry.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        jobs: Arc<dyn TableStore<Job>>,
        build_statuses: Arc<dyn TableStore<BuildStatusRecord>>,
        checkpoints: Arc<dyn TableStore<CatalogCheckpoint>>,
        batches: Arc<dyn TableStore<BatchRecord>>,
        blobs: Arc<dyn BlobStore>,
        queues: Arc<dyn QueueClient>,
        catalog: Arc<dyn CatalogClient>,
        file_store: Arc<dyn FileStoreClient>,
    ) -> Self {
        Self {
            jobs,
            build_statuses,
            checkpoints,
            batches,
            blobs,
            queues,
            catalog,
            file_store,
            standards: StandardRegistry::default(),
            execution: ExecutionOptions::default(),
            batch_expiry: Duration::hours(Self::DEFAULT_BATCH_EXPIRY_HOURS),
            event_sink: Arc::new(LoggingEventSink::default()),
        }
    }

    /// Replaces the standard profiles.
    #[must_use]
    pub fn with_standards(mut self, standards: StandardRegistry) -> Self {
        self.standards = standards;
        self
    }

    /// Replaces the global execution options.
    #[must_use]
    pub fn with_execution(mut self, execution: ExecutionOptions) -> Self {
        self.execution = execution;
        self
    }

    /// Replaces the batch lifetime.
    #[must_use]
    pub fn with_batch_expiry(mut self, expiry: Duration) -> Self {
        self.batch_expiry = expiry;
        self
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Creates every table and worker queue the pipelines write to.
    pub async fn ensure_storage(&self) -> Result<(), CollaboratorError> {
        self.jobs.create_if_not_exists().await?;
        self.build_statuses.create_if_not_exists().await?;
        self.checkpoints.create_if_not_exists().await?;
        self.batches.create_if_not_exists().await?;
        for profile in self.standards.iter() {
            self.queues.create_if_not_exists(profile.worker_queue()).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PipelineServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineServices")
            .field("standards", &self.standards)
            .field("execution", &self.execution)
            .field("batch_expiry", &self.batch_expiry)
            .finish_non_exhaustive()
    }
}
