//! Scripted catalog and recording file store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::cancellation::CancellationToken;

use crate::collaborators::{
    BatchState, CatalogChanges, CatalogClient, CatalogQuery, FileStoreClient, InMemoryFileStore,
};
use crate::errors::CollaboratorError;
use crate::model::DataStandard;

/// A catalog that replays queued responses in order.
///
/// Once the script is exhausted every query reports `NotModified`.
#[derive(Debug, Default)]
pub struct ScriptedCatalog {
    script: Mutex<VecDeque<Result<CatalogChanges, CollaboratorError>>>,
    queries: Mutex<Vec<CatalogQuery>>,
}

impl ScriptedCatalog {
    /// Creates an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the next response.
    pub fn push(&self, response: Result<CatalogChanges, CollaboratorError>) {
        self.script.lock().push_back(response);
    }

    /// Every query received, in order.
    #[must_use]
    pub fn queries(&self) -> Vec<CatalogQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl CatalogClient for ScriptedCatalog {
    async fn get_changes_since(
        &self,
        query: &CatalogQuery,
    ) -> Result<CatalogChanges, CollaboratorError> {
        self.queries.lock().push(query.clone());
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(CatalogChanges::not_modified()))
    }
}

/// One call made to a [`RecordingFileStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStoreCall {
    /// `create_batch`.
    Create {
        /// Requested standard.
        data_standard: DataStandard,
        /// Requesting job.
        job_id: String,
    },
    /// `commit_batch`.
    Commit(String),
    /// `expire_batch`.
    Expire(String),
}

/// An in-memory file store that records calls and injects failures.
#[derive(Debug, Default)]
pub struct RecordingFileStore {
    inner: InMemoryFileStore,
    calls: Mutex<Vec<FileStoreCall>>,
    fail_create: AtomicBool,
    fail_commit: AtomicBool,
    failing_expiry: Mutex<HashSet<String>>,
    commit_delay: Mutex<Option<Duration>>,
    cancel_on_commit: Mutex<Option<CancellationToken>>,
}

impl RecordingFileStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an open batch without recording a call.
    pub fn create_open_batch(&self, _data_standard: DataStandard, _job_id: &str) -> String {
        self.inner.allocate()
    }

    /// Makes `create_batch` fail.
    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Makes `commit_batch` fail after recording the call.
    pub fn set_fail_commit(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Makes every `commit_batch` take `delay` before it lands.
    pub fn set_commit_delay(&self, delay: Duration) {
        *self.commit_delay.lock() = Some(delay);
    }

    /// Cancels `token` as soon as a commit starts.
    pub fn cancel_on_commit(&self, token: CancellationToken) {
        *self.cancel_on_commit.lock() = Some(token);
    }

    /// Makes `expire_batch` fail for `batch_id`.
    pub fn fail_expire_for(&self, batch_id: &str) {
        self.failing_expiry.lock().insert(batch_id.to_string());
    }

    /// Every call made, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<FileStoreCall> {
        self.calls.lock().clone()
    }

    /// How many times `batch_id` was committed.
    #[must_use]
    pub fn commits_of(&self, batch_id: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, FileStoreCall::Commit(id) if id == batch_id))
            .count()
    }

    /// State of `batch_id`, if allocated.
    #[must_use]
    pub fn state(&self, batch_id: &str) -> Option<BatchState> {
        self.inner.state(batch_id)
    }

    fn record(&self, call: FileStoreCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl FileStoreClient for RecordingFileStore {
    async fn create_batch(
        &self,
        data_standard: DataStandard,
        job_id: &str,
    ) -> Result<String, CollaboratorError> {
        self.record(FileStoreCall::Create {
            data_standard,
            job_id: job_id.to_string(),
        });
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("file store", "batch allocation refused"));
        }
        self.inner.create_batch(data_standard, job_id).await
    }

    async fn commit_batch(&self, batch_id: &str) -> Result<(), CollaboratorError> {
        self.record(FileStoreCall::Commit(batch_id.to_string()));
        let token = self.cancel_on_commit.lock().clone();
        if let Some(token) = token {
            token.cancel("commit in flight");
        }
        let delay = *self.commit_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable("file store", "commit refused"));
        }
        self.inner.commit_batch(batch_id).await
    }

    async fn expire_batch(&self, batch_id: &str) -> Result<(), CollaboratorError> {
        self.record(FileStoreCall::Expire(batch_id.to_string()));
        if self.failing_expiry.lock().contains(batch_id) {
            return Err(CollaboratorError::unavailable("file store", "expiry refused"));
        }
        self.inner.expire_batch(batch_id).await
    }
}
