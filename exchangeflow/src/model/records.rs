//! Bookkeeping rows: catalog checkpoints and allocated batches.

use super::DataStandard;
use crate::collaborators::TableEntity;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Last catalog snapshot built for a data standard, plus the job currently
/// building a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogCheckpoint {
    /// Standard this checkpoint tracks.
    pub data_standard: DataStandard,
    /// Catalog timestamp of the last successful build.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Job currently building a newer snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_job_id: Option<String>,
    /// Snapshot the pending job is building.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_timestamp: Option<DateTime<Utc>>,
    /// Concurrency token.
    #[serde(skip)]
    pub etag: Option<String>,
}

impl CatalogCheckpoint {
    /// Partition all checkpoints share.
    pub const PARTITION: &'static str = "checkpoints";

    /// A checkpoint that has never seen a catalog snapshot.
    #[must_use]
    pub fn empty(data_standard: DataStandard) -> Self {
        Self {
            data_standard,
            last_timestamp: None,
            pending_job_id: None,
            pending_timestamp: None,
            etag: None,
        }
    }

    /// Returns true if a job other than `job_id` is already building
    /// `timestamp`.
    #[must_use]
    pub fn is_pending_elsewhere(&self, job_id: &str, timestamp: DateTime<Utc>) -> bool {
        self.pending_timestamp == Some(timestamp)
            && self.pending_job_id.as_deref().is_some_and(|id| id != job_id)
    }

    /// Records `job_id` as building `timestamp`.
    pub fn mark_pending(&mut self, job_id: impl Into<String>, timestamp: DateTime<Utc>) {
        self.pending_job_id = Some(job_id.into());
        self.pending_timestamp = Some(timestamp);
    }

    /// Clears the pending marker if it belongs to `job_id`, advancing the
    /// last built timestamp when `succeeded`.
    pub fn settle(&mut self, job_id: &str, succeeded: bool) {
        if self.pending_job_id.as_deref() != Some(job_id) {
            return;
        }
        if succeeded {
            self.last_timestamp = self.pending_timestamp.or(self.last_timestamp);
        }
        self.pending_job_id = None;
        self.pending_timestamp = None;
    }
}

impl TableEntity for CatalogCheckpoint {
    const TABLE: &'static str = "checkpoints";

    fn partition_key(&self) -> String {
        Self::PARTITION.to_string()
    }

    fn row_key(&self) -> String {
        self.data_standard.slug().to_string()
    }

    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn set_etag(&mut self, etag: Option<String>) {
        self.etag = etag;
    }
}

/// A batch allocated in the external file store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    /// File-store batch id.
    pub batch_id: String,
    /// Job the batch was allocated for.
    pub job_id: String,
    /// Standard of that job.
    pub data_standard: DataStandard,
    /// Allocation time.
    pub created_at: DateTime<Utc>,
    /// After this the batch may be expired.
    pub expires_at: DateTime<Utc>,
    /// Commit already sent.
    #[serde(default)]
    pub committed: bool,
    /// A completion run claimed the commit at this time and has not yet
    /// recorded the outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_claimed_at: Option<DateTime<Utc>>,
    /// Expiry already sent.
    #[serde(default)]
    pub expired: bool,
    /// Concurrency token.
    #[serde(skip)]
    pub etag: Option<String>,
}

impl BatchRecord {
    /// Partition holding every batch for `standard`.
    #[must_use]
    pub fn partition_for(standard: DataStandard) -> String {
        format!("batches-{}", standard.slug())
    }

    #[must_use]
    pub fn new(
        batch_id: impl Into<String>,
        job_id: impl Into<String>,
        data_standard: DataStandard,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            batch_id: batch_id.into(),
            job_id: job_id.into(),
            data_standard,
            created_at: Utc::now(),
            expires_at,
            committed: false,
            commit_claimed_at: None,
            expired: false,
            etag: None,
        }
    }

    /// How long a commit claim blocks other completion runs. A run that
    /// dies holding a claim is superseded once this elapses.
    #[must_use]
    pub fn commit_lease() -> Duration {
        Duration::minutes(5)
    }

    /// Returns true if another run holds a live commit claim at `now`.
    #[must_use]
    pub fn is_commit_claimed(&self, now: DateTime<Utc>) -> bool {
        self.commit_claimed_at
            .is_some_and(|claimed| claimed + Self::commit_lease() > now)
    }

    /// Returns true if the batch should be expired at `now`.
    #[must_use]
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        !self.expired && self.expires_at <= now
    }
}

impl TableEntity for BatchRecord {
    const TABLE: &'static str = "batches";

    fn partition_key(&self) -> String {
        Self::partition_for(self.data_standard)
    }

    fn row_key(&self) -> String {
        self.batch_id.clone()
    }

    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn set_etag(&mut self, etag: Option<String>) {
        self.etag = etag;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_pending_elsewhere() {
        let mut cp = CatalogCheckpoint::empty(DataStandard::S100);
        assert!(!cp.is_pending_elsewhere("a", ts(0)));
        cp.mark_pending("a", ts(0));
        assert!(!cp.is_pending_elsewhere("a", ts(0)));
        assert!(cp.is_pending_elsewhere("b", ts(0)));
        assert!(!cp.is_pending_elsewhere("b", ts(1)));
    }

    #[test]
    fn test_settle_success_advances() {
        let mut cp = CatalogCheckpoint::empty(DataStandard::S63);
        cp.mark_pending("a", ts(10));
        cp.settle("a", true);
        assert_eq!(cp.last_timestamp, Some(ts(10)));
        assert_eq!(cp.pending_job_id, None);
    }

    #[test]
    fn test_settle_failure_keeps_last_timestamp() {
        let mut cp = CatalogCheckpoint::empty(DataStandard::S63);
        cp.last_timestamp = Some(ts(1));
        cp.mark_pending("a", ts(10));
        cp.settle("a", false);
        assert_eq!(cp.last_timestamp, Some(ts(1)));
        assert_eq!(cp.pending_timestamp, None);
    }

    #[test]
    fn test_settle_ignores_other_jobs() {
        let mut cp = CatalogCheckpoint::empty(DataStandard::S57);
        cp.mark_pending("a", ts(10));
        cp.settle("b", true);
        assert_eq!(cp.pending_job_id.as_deref(), Some("a"));
        assert_eq!(cp.last_timestamp, None);
    }

    #[test]
    fn test_batch_expiry() {
        let now = Utc::now();
        let mut batch = BatchRecord::new("b", "j", DataStandard::S57, now - Duration::hours(1));
        assert!(batch.is_due_for_expiry(now));
        batch.expired = true;
        assert!(!batch.is_due_for_expiry(now));
        assert_eq!(batch.partition_key(), "batches-s57");
    }

    #[test]
    fn test_commit_claim_lapses_after_lease() {
        let now = Utc::now();
        let mut batch = BatchRecord::new("b", "j", DataStandard::S57, now);
        assert!(!batch.is_commit_claimed(now));

        batch.commit_claimed_at = Some(now);
        assert!(batch.is_commit_claimed(now + Duration::minutes(1)));
        assert!(!batch.is_commit_claimed(now + BatchRecord::commit_lease()));
    }
}
