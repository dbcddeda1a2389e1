//! The Build: what a worker is asked to produce, and what it reports back.

use super::{BuildNodeStatus, DataStandard, Job};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Progress of a build as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BuildState {
    /// Described but not yet handed to a worker.
    #[default]
    NotScheduled,
    /// Handed to a worker.
    Scheduled,
    /// Worker reported success.
    Succeeded,
    /// Worker reported failure.
    Failed,
}

/// Parameters for S-100 builds.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S100Details {
    /// Requested product names.
    #[serde(default)]
    pub product_names: Vec<String>,
    /// Optional product filter expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

/// Parameters for product-list standards (S-63, S-57).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductListDetails {
    /// Requested product names.
    #[serde(default)]
    pub product_names: Vec<String>,
}

/// Standard-specific build parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "dataStandard")]
pub enum BuildDetails {
    /// S-100 parameters.
    S100(S100Details),
    /// S-63 parameters.
    S63(ProductListDetails),
    /// S-57 parameters.
    S57(ProductListDetails),
}

impl BuildDetails {
    /// Builds the variant matching `job`'s data standard.
    #[must_use]
    pub fn for_job(job: &Job) -> Self {
        let product_names = job.products.clone();
        match job.data_standard {
            DataStandard::S100 => Self::S100(S100Details {
                product_names,
                filter: job.filter.clone(),
            }),
            DataStandard::S63 => Self::S63(ProductListDetails { product_names }),
            DataStandard::S57 => Self::S57(ProductListDetails { product_names }),
        }
    }

    /// The data standard this variant belongs to.
    #[must_use]
    pub fn data_standard(&self) -> DataStandard {
        match self {
            Self::S100(_) => DataStandard::S100,
            Self::S63(_) => DataStandard::S63,
            Self::S57(_) => DataStandard::S57,
        }
    }
}

/// Severity of a worker log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum LogLevel {
    Trace,
    Debug,
    Information,
    Warning,
    Error,
    Critical,
}

/// One line of worker output, replayed into the orchestrator's log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildLogLine {
    /// When the worker logged the line.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// Rendered message.
    pub message: String,
}

/// Per-data-standard description of work and its outcome.
///
/// Uploaded to the workspace before dispatch; the worker downloads it,
/// fills in statuses, log lines and final state, and uploads the result
/// as the job's summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    /// Owning job id, also the correlation key on the worker side.
    pub job_id: String,
    /// Batch the worker should upload into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    /// Standard-specific parameters; the tag must match the job's standard.
    pub details: BuildDetails,
    /// Product names resolved from the catalog.
    #[serde(default)]
    pub products: Vec<String>,
    /// Build progress.
    #[serde(default)]
    pub state: BuildState,
    /// Steps the worker ran.
    #[serde(default)]
    pub node_statuses: Vec<BuildNodeStatus>,
    /// Worker output, in emission order.
    #[serde(default)]
    pub log_lines: Vec<BuildLogLine>,
}

impl Build {
    /// Describes the build for `job`, with no products resolved yet.
    #[must_use]
    pub fn for_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            batch_id: job.batch_id.clone(),
            details: BuildDetails::for_job(job),
            products: Vec::new(),
            state: BuildState::NotScheduled,
            node_statuses: Vec::new(),
            log_lines: Vec::new(),
        }
    }

    /// The build's data standard.
    #[must_use]
    pub fn data_standard(&self) -> DataStandard {
        self.details.data_standard()
    }

    /// Returns true if this build belongs to `job`.
    #[must_use]
    pub fn belongs_to(&self, job: &Job) -> bool {
        self.job_id == job.id && self.data_standard() == job.data_standard
    }
}
