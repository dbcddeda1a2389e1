//! The upstream product catalog.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::errors::CollaboratorError;
use crate::model::DataStandard;

/// A change query against the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogQuery {
    /// Standard whose catalog is queried.
    pub data_standard: DataStandard,
    /// Only report changes after this timestamp; `None` means everything.
    pub since: Option<DateTime<Utc>>,
    /// Restrict to these product names; empty means all products.
    pub product_names: Vec<String>,
    /// Standard-specific filter expression.
    pub filter: Option<String>,
}

/// Whether the catalog changed since the queried timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogStatus {
    /// New content since the timestamp.
    Changed,
    /// Nothing changed.
    NotModified,
}

/// Result of a change query. Transport or server failures are reported as
/// `Err` by the client instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogChanges {
    /// Changed or not.
    pub status: CatalogStatus,
    /// Changed product names.
    pub products: Vec<String>,
    /// Catalog timestamp of this snapshot.
    pub timestamp: Option<DateTime<Utc>>,
}

impl CatalogChanges {
    /// A response reporting no change.
    #[must_use]
    pub fn not_modified() -> Self {
        Self {
            status: CatalogStatus::NotModified,
            products: Vec::new(),
            timestamp: None,
        }
    }

    /// A response reporting `products` changed as of `timestamp`.
    #[must_use]
    pub fn changed(products: Vec<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            status: CatalogStatus::Changed,
            products,
            timestamp: Some(timestamp),
        }
    }
}

/// Client for the upstream catalog.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Reports products changed since `query.since`.
    async fn get_changes_since(&self, query: &CatalogQuery)
        -> Result<CatalogChanges, CollaboratorError>;
}

#[derive(Debug, Clone)]
struct Snapshot {
    products: Vec<String>,
    timestamp: DateTime<Utc>,
}

/// In-memory catalog holding the latest published snapshot per standard.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    snapshots: RwLock<HashMap<DataStandard, Snapshot>>,
}

impl InMemoryCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a new snapshot for `standard`.
    pub fn publish(&self, standard: DataStandard, products: Vec<String>, timestamp: DateTime<Utc>) {
        self.snapshots
            .write()
            .insert(standard, Snapshot { products, timestamp });
    }
}

#[async_trait]
impl CatalogClient for InMemoryCatalog {
    async fn get_changes_since(
        &self,
        query: &CatalogQuery,
    ) -> Result<CatalogChanges, CollaboratorError> {
        let snapshots = self.snapshots.read();
        let Some(snapshot) = snapshots.get(&query.data_standard) else {
            return Ok(CatalogChanges::not_modified());
        };
        if query.since.is_some_and(|since| snapshot.timestamp <= since) {
            return Ok(CatalogChanges::not_modified());
        }
        let products = snapshot
            .products
            .iter()
            .filter(|p| query.product_names.is_empty() || query.product_names.contains(p))
            .cloned()
            .collect();
        Ok(CatalogChanges::changed(products, snapshot.timestamp))
    }
}
