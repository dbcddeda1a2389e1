//! Persisted entities and worker-queue messages.
//!
//! - [`Job`] and its state machine
//! - [`Build`], the per-data-standard work description and outcome
//! - [`BuildStatusRecord`] / [`BuildNodeStatus`], the replayable step log
//! - queue messages exchanged with builder workers
//! - bookkeeping rows for catalog checkpoints and allocated batches

mod build;
mod build_status;
mod job;
mod messages;
mod records;
mod standard;

pub use build::{Build, BuildDetails, BuildLogLine, BuildState, LogLevel, ProductListDetails, S100Details};
pub use build_status::{BuildNodeStatus, BuildStatusRecord};
pub use job::{Job, JobState};
pub use messages::{
    AssemblyRequest, BuildRequest, BuildResponse, ExchangeSetRequest, JobProjection,
    ValidationError, WorkerExitCode,
};
pub use records::{BatchRecord, CatalogCheckpoint};
pub use standard::{DataStandard, UnknownDataStandard};

/// Blob key of the work description uploaded for a job.
#[must_use]
pub fn build_blob_key(job_id: &str) -> String {
    format!("jobs/{job_id}/build.json")
}

/// Blob key of the summary a worker uploads when it finishes.
#[must_use]
pub fn summary_blob_key(job_id: &str) -> String {
    format!("jobs/{job_id}/summary.json")
}
