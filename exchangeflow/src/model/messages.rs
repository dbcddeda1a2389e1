//! Queue and API message schemas. All JSON fields are camelCase.

use super::{DataStandard, Job, JobState};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of a job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSetRequest {
    /// Data standard name, parsed leniently.
    pub data_standard: String,
    /// Requested product names; empty asks for every changed product.
    #[serde(default)]
    pub products: Vec<String>,
    /// Product filter expression (S-100 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Caller correlation id; defaults to the job id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// Reasons a submission is rejected before a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The data standard name is not recognised.
    #[error("Unknown data standard '{0}'")]
    UnknownStandard(String),

    /// A product name is empty or whitespace.
    #[error("Product names must not be blank")]
    BlankProduct,

    /// A filter was sent for a standard that has none.
    #[error("Data standard {0} does not accept a product filter")]
    FilterNotSupported(DataStandard),
}

impl ExchangeSetRequest {
    /// Checks the request and resolves its data standard.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first problem found.
    pub fn validate(&self) -> Result<DataStandard, ValidationError> {
        let standard: DataStandard = self
            .data_standard
            .parse()
            .map_err(|_| ValidationError::UnknownStandard(self.data_standard.clone()))?;
        if self.products.iter().any(|p| p.trim().is_empty()) {
            return Err(ValidationError::BlankProduct);
        }
        if self.filter.is_some() && !standard.supports_filter() {
            return Err(ValidationError::FilterNotSupported(standard));
        }
        Ok(standard)
    }

    /// Converts a validated request into the queued form.
    #[must_use]
    pub fn into_assembly(
        self,
        job_id: String,
        data_standard: DataStandard,
        correlation_id: String,
    ) -> AssemblyRequest {
        AssemblyRequest {
            job_id,
            data_standard,
            products: self.products,
            filter: self.filter,
            correlation_id,
        }
    }
}

/// Queued request to assemble one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssemblyRequest {
    /// Job id assigned at submission.
    pub job_id: String,
    /// Target data standard.
    pub data_standard: DataStandard,
    /// Requested product names.
    #[serde(default)]
    pub products: Vec<String>,
    /// Product filter expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    /// Caller correlation id.
    pub correlation_id: String,
}

impl AssemblyRequest {
    /// A fresh job for this request.
    #[must_use]
    pub fn to_job(&self) -> Job {
        Job::new(
            self.job_id.clone(),
            self.data_standard,
            self.products.clone(),
            self.filter.clone(),
            self.correlation_id.clone(),
        )
    }
}

/// Message sent to a builder worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    /// Job to build.
    pub job_id: String,
    /// Batch the worker writes files into.
    pub batch_id: String,
    /// Data standard of the build.
    pub data_standard: DataStandard,
    /// Blob key of the uploaded build description.
    pub workspace_key: String,
    /// File name template; `{jobId}` is substituted by the worker.
    pub exchange_set_name_template: String,
}

/// Worker process outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerExitCode {
    /// The build completed.
    Success,
    /// The build failed.
    Failed,
    /// The worker never started the build.
    NotRun,
}

impl WorkerExitCode {
    /// Terminal job state for this outcome.
    #[must_use]
    pub fn terminal_state(&self) -> JobState {
        match self {
            Self::Success => JobState::Succeeded,
            Self::Failed | Self::NotRun => JobState::Failed,
        }
    }

    /// Returns true for `Success`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Message a worker sends back when it finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResponse {
    /// Job the worker built.
    pub job_id: String,
    /// Batch the worker wrote into, if it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    /// Data standard, checked against the job when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_standard: Option<DataStandard>,
    /// Worker outcome.
    pub exit_code: WorkerExitCode,
}

/// Caller-visible view of a job after assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProjection {
    /// Job id.
    pub job_id: String,
    /// State after assembly.
    pub state: JobState,
    /// Allocated batch, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

impl From<&Job> for JobProjection {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            state: job.state,
            batch_id: job.batch_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(standard: &str) -> ExchangeSetRequest {
        ExchangeSetRequest {
            data_standard: standard.to_string(),
            products: vec![],
            filter: None,
            correlation_id: None,
        }
    }

    #[test]
    fn test_validate_accepts_known_standard() {
        assert_eq!(request("s63").validate(), Ok(DataStandard::S63));
    }

    #[test]
    fn test_validate_rejects_unknown_standard() {
        assert_eq!(
            request("S101").validate(),
            Err(ValidationError::UnknownStandard("S101".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_blank_products() {
        let mut r = request("S57");
        r.products = vec!["GB1".to_string(), "  ".to_string()];
        assert_eq!(r.validate(), Err(ValidationError::BlankProduct));
    }

    #[test]
    fn test_filter_only_for_s100() {
        let mut r = request("S57");
        r.filter = Some("x".to_string());
        assert_eq!(
            r.validate(),
            Err(ValidationError::FilterNotSupported(DataStandard::S57))
        );
        r.data_standard = "S100".to_string();
        assert_eq!(r.validate(), Ok(DataStandard::S100));
    }

    #[test]
    fn test_build_request_wire_format() {
        let msg = BuildRequest {
            job_id: "j".to_string(),
            batch_id: "b".to_string(),
            data_standard: DataStandard::S100,
            workspace_key: "jobs/j/build.json".to_string(),
            exchange_set_name_template: "S100-ExchangeSet-{jobId}.zip".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["jobId"], "j");
        assert_eq!(json["batchId"], "b");
        assert_eq!(json["dataStandard"], "S100");
        assert_eq!(json["workspaceKey"], "jobs/j/build.json");
        assert_eq!(json["exchangeSetNameTemplate"], "S100-ExchangeSet-{jobId}.zip");
    }

    #[test]
    fn test_build_response_minimal() {
        let msg: BuildResponse =
            serde_json::from_str(r#"{"jobId":"j","exitCode":"NotRun"}"#).unwrap();
        assert_eq!(msg.exit_code.terminal_state(), JobState::Failed);
        assert_eq!(msg.batch_id, None);
    }
}
