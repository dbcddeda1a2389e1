//! Every collaborator wired in memory.

use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

use super::{RecordingFileStore, ScriptedCatalog};
use crate::collaborators::{InMemoryBlobStore, InMemoryQueueService, InMemoryTable};
use crate::events::CollectingEventSink;
use crate::model::{BatchRecord, BuildStatusRecord, CatalogCheckpoint, Job};
use crate::pipelines::PipelineServices;

/// In-memory collaborators with handles kept for inspection.
///
/// Queue messages that are received but not deleted become visible again
/// immediately.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct InMemoryEnvironment {
    pub jobs: Arc<InMemoryTable<Job>>,
    pub build_statuses: Arc<InMemoryTable<BuildStatusRecord>>,
    pub checkpoints: Arc<InMemoryTable<CatalogCheckpoint>>,
    pub batches: Arc<InMemoryTable<BatchRecord>>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub queues: Arc<InMemoryQueueService>,
    pub catalog: Arc<ScriptedCatalog>,
    pub file_store: Arc<RecordingFileStore>,
    pub events: Arc<CollectingEventSink>,
}

impl Default for InMemoryEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEnvironment {
    /// Creates empty collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(InMemoryTable::new()),
            build_statuses: Arc::new(InMemoryTable::new()),
            checkpoints: Arc::new(InMemoryTable::new()),
            batches: Arc::new(InMemoryTable::new()),
            blobs: Arc::new(InMemoryBlobStore::new()),
            queues: Arc::new(InMemoryQueueService::new(Duration::ZERO)),
            catalog: Arc::new(ScriptedCatalog::new()),
            file_store: Arc::new(RecordingFileStore::new()),
            events: Arc::new(CollectingEventSink::new()),
        }
    }

    /// Pipeline services backed by this environment.
    #[must_use]
    pub fn services(&self) -> PipelineServices {
        PipelineServices::new(
            self.jobs.clone(),
            self.build_statuses.clone(),
            self.checkpoints.clone(),
            self.batches.clone(),
            self.blobs.clone(),
            self.queues.clone(),
            self.catalog.clone(),
            self.file_store.clone(),
        )
        .with_event_sink(self.events.clone())
    }
}

/// Captures formatted log output for assertions.
#[derive(Debug, Clone, Default)]
pub struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Everything written so far.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }

    /// A plain-text subscriber writing into this buffer at every level.
    #[must_use]
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        let writer = self.clone();
        tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(Level::TRACE)
            .finish()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
