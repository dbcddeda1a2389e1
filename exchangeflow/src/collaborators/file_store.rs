//! The external file store that receives built exchange sets.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::errors::CollaboratorError;
use crate::model::DataStandard;

/// Lifecycle of a batch in the file store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    /// Allocated; files may be uploaded.
    Open,
    /// Published.
    Committed,
    /// Removed.
    Expired,
}

/// File store client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileStoreClient: Send + Sync {
    /// Allocates a batch for `job_id` and returns its id.
    async fn create_batch(
        &self,
        data_standard: DataStandard,
        job_id: &str,
    ) -> Result<String, CollaboratorError>;

    /// Publishes a batch.
    async fn commit_batch(&self, batch_id: &str) -> Result<(), CollaboratorError>;

    /// Expires a batch.
    async fn expire_batch(&self, batch_id: &str) -> Result<(), CollaboratorError>;
}

/// In-memory file store.
#[derive(Debug, Default)]
pub struct InMemoryFileStore {
    batches: DashMap<String, BatchState>,
}

impl InMemoryFileStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an open batch and returns its id.
    pub fn allocate(&self) -> String {
        let batch_id = Uuid::new_v4().to_string();
        self.batches.insert(batch_id.clone(), BatchState::Open);
        batch_id
    }

    /// State of `batch_id`, if allocated.
    #[must_use]
    pub fn state(&self, batch_id: &str) -> Option<BatchState> {
        self.batches.get(batch_id).map(|entry| *entry.value())
    }

    fn transition(&self, batch_id: &str, next: BatchState) -> Result<(), CollaboratorError> {
        let mut entry = self
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| CollaboratorError::NotFound {
                kind: "batch",
                key: batch_id.to_string(),
            })?;
        if *entry.value() == BatchState::Expired {
            return Err(CollaboratorError::Conflict {
                key: batch_id.to_string(),
            });
        }
        *entry.value_mut() = next;
        Ok(())
    }
}

#[async_trait]
impl FileStoreClient for InMemoryFileStore {
    async fn create_batch(
        &self,
        _data_standard: DataStandard,
        _job_id: &str,
    ) -> Result<String, CollaboratorError> {
        Ok(self.allocate())
    }

    async fn commit_batch(&self, batch_id: &str) -> Result<(), CollaboratorError> {
        self.transition(batch_id, BatchState::Committed)
    }

    async fn expire_batch(&self, batch_id: &str) -> Result<(), CollaboratorError> {
        self.transition(batch_id, BatchState::Expired)
    }
}
