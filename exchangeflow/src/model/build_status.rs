//! Append-only step log for a build.

use crate::collaborators::TableEntity;
use crate::core::NodeStatus;
use crate::sequence::next_sequence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{DataStandard, WorkerExitCode};

/// One step executed by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildNodeStatus {
    /// Process-wide order stamp, assigned when the orchestrator records it.
    #[serde(default)]
    pub sequence: u64,
    /// Worker-side node identifier.
    pub node_id: String,
    /// Step outcome.
    pub status: NodeStatus,
    /// Step start, as reported by the worker.
    pub started_at: DateTime<Utc>,
    /// Step duration.
    #[serde(default)]
    pub elapsed_ms: u64,
    /// Failure message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BuildNodeStatus {
    /// Creates an unstamped status.
    #[must_use]
    pub fn new(node_id: impl Into<String>, status: NodeStatus, started_at: DateTime<Utc>) -> Self {
        Self {
            sequence: 0,
            node_id: node_id.into(),
            status,
            started_at,
            elapsed_ms: 0,
            error: None,
        }
    }

    fn same_step(&self, other: &Self) -> bool {
        self.node_id == other.node_id && self.started_at == other.started_at
    }
}

/// Persisted record of a build's progress, keyed by job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatusRecord {
    /// Job id; also the partition key.
    pub job_id: String,
    /// Standard of the build.
    pub data_standard: DataStandard,
    /// When assembly created the record.
    pub started_at: DateTime<Utc>,
    /// Set once the worker's response is merged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Worker outcome, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<WorkerExitCode>,
    /// Steps in sequence order.
    #[serde(default)]
    pub node_statuses: Vec<BuildNodeStatus>,
    /// Concurrency token.
    #[serde(skip)]
    pub etag: Option<String>,
}

impl BuildStatusRecord {
    /// Row key status records are stored under (partition key = job id).
    pub const ROW_KEY: &'static str = "status";

    /// A zero-progress record.
    #[must_use]
    pub fn started(job_id: impl Into<String>, data_standard: DataStandard) -> Self {
        Self {
            job_id: job_id.into(),
            data_standard,
            started_at: Utc::now(),
            ended_at: None,
            exit_code: None,
            node_statuses: Vec::new(),
            etag: None,
        }
    }

    /// Appends `status` with a fresh sequence number.
    ///
    /// Returns false without appending if a status for the same node and
    /// start time is already present.
    pub fn append(&mut self, mut status: BuildNodeStatus) -> bool {
        if self.node_statuses.iter().any(|s| s.same_step(&status)) {
            return false;
        }
        status.sequence = next_sequence();
        self.node_statuses.push(status);
        true
    }

    /// Appends every status not yet present. Returns how many were added.
    pub fn merge(&mut self, statuses: impl IntoIterator<Item = BuildNodeStatus>) -> usize {
        statuses
            .into_iter()
            .map(|s| usize::from(self.append(s)))
            .sum()
    }

    /// Stamps the end of the build.
    pub fn finish(&mut self, exit_code: WorkerExitCode) {
        self.exit_code = Some(exit_code);
        self.ended_at = Some(Utc::now());
    }

    /// Returns true once the build end has been recorded.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }
}

impl TableEntity for BuildStatusRecord {
    const TABLE: &'static str = "buildstatus";

    fn partition_key(&self) -> String {
        self.job_id.clone()
    }

    fn row_key(&self) -> String {
        Self::ROW_KEY.to_string()
    }

    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    fn set_etag(&mut self, etag: Option<String>) {
        self.etag = etag;
    }
}
