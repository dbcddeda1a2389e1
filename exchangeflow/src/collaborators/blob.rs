//! Blob storage for build descriptions and worker summaries.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::CollaboratorError;

/// Keyed binary object storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Downloads a blob.
    async fn download(&self, key: &str) -> Result<Vec<u8>, CollaboratorError>;

    /// Uploads a blob. Fails with `AlreadyExists` when the key is taken and
    /// `overwrite` is false.
    async fn upload(&self, key: &str, data: Vec<u8>, overwrite: bool)
        -> Result<(), CollaboratorError>;
}

/// Downloads and parses a JSON blob.
pub async fn download_json<T: DeserializeOwned>(
    store: &dyn BlobStore,
    key: &str,
) -> Result<T, CollaboratorError> {
    let bytes = store.download(key).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Serializes `value` and uploads it, replacing any existing blob.
pub async fn upload_json<T: Serialize + Sync>(
    store: &dyn BlobStore,
    key: &str,
    value: &T,
) -> Result<(), CollaboratorError> {
    let bytes = serde_json::to_vec(value)?;
    store.upload(key, bytes, true).await
}

/// In-memory blob store.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl InMemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a blob exists under `key`.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }

    /// Number of stored blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns true if no blobs are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn download(&self, key: &str) -> Result<Vec<u8>, CollaboratorError> {
        self.blobs
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CollaboratorError::NotFound {
                kind: "blob",
                key: key.to_string(),
            })
    }

    async fn upload(
        &self,
        key: &str,
        data: Vec<u8>,
        overwrite: bool,
    ) -> Result<(), CollaboratorError> {
        if !overwrite && self.blobs.contains_key(key) {
            return Err(CollaboratorError::AlreadyExists {
                kind: "blob",
                key: key.to_string(),
            });
        }
        self.blobs.insert(key.to_string(), data);
        Ok(())
    }
}
