//! External collaborators: persistence, queues, the upstream catalog and
//! the file store.
//!
//! Each collaborator is a trait so the pipelines can run against real
//! cloud clients or the in-memory implementations provided here.

mod blob;
mod catalog;
mod file_store;
mod queue;
mod table;

pub use blob::{download_json, upload_json, BlobStore, InMemoryBlobStore};
pub use catalog::{
    CatalogChanges, CatalogClient, CatalogQuery, CatalogStatus, InMemoryCatalog,
};
pub use file_store::{BatchState, FileStoreClient, InMemoryFileStore};
pub use queue::{InMemoryQueueService, QueueClient, QueueMessage};
pub use table::{InMemoryTable, TableEntity, TableStore};

#[cfg(test)]
pub use catalog::MockCatalogClient;
#[cfg(test)]
pub use file_store::MockFileStoreClient;
