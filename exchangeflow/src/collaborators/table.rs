//! Keyed entity storage with optimistic concurrency.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::errors::CollaboratorError;

/// An entity stored in a table under a (partition key, row key) pair.
pub trait TableEntity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Table name, used in error messages.
    const TABLE: &'static str;

    /// Partition key.
    fn partition_key(&self) -> String;

    /// Row key, unique within the partition.
    fn row_key(&self) -> String;

    /// Concurrency token from the last read or write.
    fn etag(&self) -> Option<&str> {
        None
    }

    /// Stores the concurrency token assigned by the table.
    fn set_etag(&mut self, _etag: Option<String>) {}
}

/// Table storage for one entity type.
///
/// Writes return the stored entity carrying its new etag.
#[async_trait]
pub trait TableStore<T: TableEntity>: Send + Sync {
    /// Creates the backing table if it does not exist.
    async fn create_if_not_exists(&self) -> Result<(), CollaboratorError>;

    /// Reads one entity.
    async fn get(&self, partition_key: &str, row_key: &str) -> Result<T, CollaboratorError>;

    /// Inserts an entity; fails with `AlreadyExists` if the key is taken.
    async fn add(&self, entity: &T) -> Result<T, CollaboratorError>;

    /// Replaces an existing entity.
    ///
    /// If the entity carries an etag it must match the stored one, else
    /// `Conflict` is returned.
    async fn update(&self, entity: &T) -> Result<T, CollaboratorError>;

    /// Inserts or unconditionally replaces an entity.
    async fn upsert(&self, entity: &T) -> Result<T, CollaboratorError>;

    /// Lists every entity in a partition, ordered by row key.
    async fn query(&self, partition_key: &str) -> Result<Vec<T>, CollaboratorError>;

    /// Reads one entity, mapping `NotFound` to `None`.
    async fn try_get(
        &self,
        partition_key: &str,
        row_key: &str,
    ) -> Result<Option<T>, CollaboratorError> {
        match self.get(partition_key, row_key).await {
            Ok(entity) => Ok(Some(entity)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRow {
    payload: serde_json::Value,
    etag: u64,
}

/// In-memory table. Rows are held as JSON so stored state never aliases
/// caller-owned values.
#[derive(Debug)]
pub struct InMemoryTable<T> {
    rows: Mutex<BTreeMap<(String, String), StoredRow>>,
    next_etag: AtomicU64,
    fail_writes: AtomicBool,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Default for InMemoryTable<T> {
    fn default() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            next_etag: AtomicU64::new(1),
            fail_writes: AtomicBool::new(false),
            _entity: PhantomData,
        }
    }
}

impl<T: TableEntity> InMemoryTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Makes every subsequent write fail with `Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), CollaboratorError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CollaboratorError::unavailable(
                "table",
                format!("writes to '{}' are disabled", T::TABLE),
            ));
        }
        Ok(())
    }

    fn key_of(entity: &T) -> (String, String) {
        (entity.partition_key(), entity.row_key())
    }

    fn display_key(key: &(String, String)) -> String {
        format!("{}/{}/{}", T::TABLE, key.0, key.1)
    }

    fn hydrate(row: &StoredRow) -> Result<T, CollaboratorError> {
        let mut entity: T = serde_json::from_value(row.payload.clone())?;
        entity.set_etag(Some(row.etag.to_string()));
        Ok(entity)
    }

    fn store(
        &self,
        rows: &mut BTreeMap<(String, String), StoredRow>,
        key: (String, String),
        entity: &T,
    ) -> Result<T, CollaboratorError> {
        let row = StoredRow {
            payload: serde_json::to_value(entity)?,
            etag: self.next_etag.fetch_add(1, Ordering::SeqCst),
        };
        let stored = Self::hydrate(&row)?;
        rows.insert(key, row);
        Ok(stored)
    }
}

#[async_trait]
impl<T: TableEntity> TableStore<T> for InMemoryTable<T> {
    async fn create_if_not_exists(&self) -> Result<(), CollaboratorError> {
        Ok(())
    }

    async fn get(&self, partition_key: &str, row_key: &str) -> Result<T, CollaboratorError> {
        let key = (partition_key.to_string(), row_key.to_string());
        let rows = self.rows.lock();
        let row = rows.get(&key).ok_or_else(|| CollaboratorError::NotFound {
            kind: "table row",
            key: Self::display_key(&key),
        })?;
        Self::hydrate(row)
    }

    async fn add(&self, entity: &T) -> Result<T, CollaboratorError> {
        self.check_writable()?;
        let key = Self::key_of(entity);
        let mut rows = self.rows.lock();
        if rows.contains_key(&key) {
            return Err(CollaboratorError::AlreadyExists {
                kind: "table row",
                key: Self::display_key(&key),
            });
        }
        self.store(&mut rows, key, entity)
    }

    async fn update(&self, entity: &T) -> Result<T, CollaboratorError> {
        self.check_writable()?;
        let key = Self::key_of(entity);
        let mut rows = self.rows.lock();
        let current = rows.get(&key).ok_or_else(|| CollaboratorError::NotFound {
            kind: "table row",
            key: Self::display_key(&key),
        })?;
        if let Some(etag) = entity.etag() {
            if etag != current.etag.to_string() {
                return Err(CollaboratorError::Conflict {
                    key: Self::display_key(&key),
                });
            }
        }
        self.store(&mut rows, key, entity)
    }

    async fn upsert(&self, entity: &T) -> Result<T, CollaboratorError> {
        self.check_writable()?;
        let key = Self::key_of(entity);
        let mut rows = self.rows.lock();
        self.store(&mut rows, key, entity)
    }

    async fn query(&self, partition_key: &str) -> Result<Vec<T>, CollaboratorError> {
        let rows = self.rows.lock();
        rows.iter()
            .filter(|((pk, _), _)| pk == partition_key)
            .map(|(_, row)| Self::hydrate(row))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        pk: String,
        rk: String,
        value: u32,
        #[serde(skip)]
        etag: Option<String>,
    }

    impl Row {
        fn new(pk: &str, rk: &str, value: u32) -> Self {
            Self {
                pk: pk.to_string(),
                rk: rk.to_string(),
                value,
                etag: None,
            }
        }
    }

    impl TableEntity for Row {
        const TABLE: &'static str = "rows";

        fn partition_key(&self) -> String {
            self.pk.clone()
        }

        fn row_key(&self) -> String {
            self.rk.clone()
        }

        fn etag(&self) -> Option<&str> {
            self.etag.as_deref()
        }

        fn set_etag(&mut self, etag: Option<String>) {
            self.etag = etag;
        }
    }

    #[tokio::test]
    async fn test_add_then_get() {
        let table = InMemoryTable::<Row>::new();
        let stored = table.add(&Row::new("p", "a", 1)).await.unwrap();
        assert!(stored.etag.is_some());

        let fetched = table.get("p", "a").await.unwrap();
        assert_eq!(fetched.value, 1);
        assert_eq!(fetched.etag, stored.etag);
    }

    #[tokio::test]
    async fn test_add_rejects_existing_key() {
        let table = InMemoryTable::<Row>::new();
        table.add(&Row::new("p", "a", 1)).await.unwrap();
        let err = table.add(&Row::new("p", "a", 2)).await.unwrap_err();
        assert!(matches!(err, CollaboratorError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_with_stale_etag_conflicts() {
        let table = InMemoryTable::<Row>::new();
        let first = table.add(&Row::new("p", "a", 1)).await.unwrap();

        let mut winner = first.clone();
        winner.value = 2;
        table.update(&winner).await.unwrap();

        let mut loser = first;
        loser.value = 3;
        let err = table.update(&loser).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(table.get("p", "a").await.unwrap().value, 2);
    }

    #[tokio::test]
    async fn test_update_missing_row() {
        let table = InMemoryTable::<Row>::new();
        let err = table.update(&Row::new("p", "a", 1)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_try_get_and_query() {
        let table = InMemoryTable::<Row>::new();
        assert_eq!(table.try_get("p", "a").await.unwrap(), None);

        table.upsert(&Row::new("p", "b", 2)).await.unwrap();
        table.upsert(&Row::new("p", "a", 1)).await.unwrap();
        table.upsert(&Row::new("q", "a", 9)).await.unwrap();

        let values: Vec<u32> = table
            .query("p")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let table = InMemoryTable::<Row>::new();
        table.set_fail_writes(true);
        assert!(table.upsert(&Row::new("p", "a", 1)).await.is_err());
        assert!(table.is_empty());
    }
}
