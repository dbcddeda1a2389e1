//! The Job entity and its lifecycle state machine.

use super::DataStandard;
use crate::collaborators::TableEntity;
use crate::errors::TransitionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a job.
///
/// ```text
/// Created -> UpToDate | Duplicate | Failed
/// Created -> InProgress -> Succeeded | Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum JobState {
    /// Accepted, nothing decided yet.
    #[default]
    Created,
    /// The upstream catalog reported no change since the last build.
    UpToDate,
    /// Another job is already building the same catalog snapshot.
    Duplicate,
    /// A batch is allocated and a worker has been asked to build.
    InProgress,
    /// The worker finished successfully.
    Succeeded,
    /// The job failed; retry is a new submission.
    Failed,
}

impl JobState {
    /// Returns true if no further transition is possible.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::UpToDate | Self::Duplicate | Self::Succeeded | Self::Failed
        )
    }

    /// Returns true if `self -> next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Created,
                Self::UpToDate | Self::Duplicate | Self::InProgress | Self::Failed
            ) | (Self::InProgress, Self::Succeeded | Self::Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "Created",
            Self::UpToDate => "UpToDate",
            Self::Duplicate => "Duplicate",
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// One triggered request to produce an exchange set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Opaque job id.
    pub id: String,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// Requested data standard.
    pub data_standard: DataStandard,
    /// Requested product names (empty = everything changed).
    #[serde(default)]
    pub products: Vec<String>,
    /// Requested product filter expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Caller-supplied correlation id.
    pub correlation_id: String,
    /// Lifecycle state.
    pub state: JobState,
    /// Batch allocated in the external file store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    /// Upstream catalog timestamp this job builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_timestamp: Option<DateTime<Utc>>,
    /// Last time the state changed.
    pub updated_at: DateTime<Utc>,
    /// Concurrency token assigned by the table store.
    #[serde(skip)]
    pub etag: Option<String>,
}

impl Job {
    /// Creates a job in the `Created` state.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        data_standard: DataStandard,
        products: Vec<String>,
        filter: Option<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            data_standard,
            products,
            filter,
            correlation_id: correlation_id.into(),
            state: JobState::Created,
            batch_id: None,
            catalog_timestamp: None,
            updated_at: now,
            etag: None,
        }
    }

    /// Moves the job to `next`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] if the transition is not legal; the
    /// job is left unchanged.
    pub fn transition(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                job_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Marks the job failed from whatever non-terminal state it is in.
    ///
    /// Returns false if the job was already terminal.
    pub fn fail(&mut self) -> bool {
        self.transition(JobState::Failed).is_ok()
    }
}

impl TableEntity for Job {
    const TABLE: &'static str = "jobs";

    fn partition_key(&self) -> String {
        self.id.clone()
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

impl Job {
    /// Row key jobs are stored under (partition key = job id).
    pub const ROW_KEY: &'static str = "job";
}
