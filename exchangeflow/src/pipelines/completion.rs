//! The Completion pipeline: a worker's response in, Job finalized.
//!
//! ```text
//! completion (stop on first failure)
//! ├── fetch_summary
//! ├── fetch_status_record
//! ├── fetch_job
//! ├── merge_statuses       skipped when the job was already terminal
//! ├── update_job_state     skipped when the job was already terminal
//! ├── settle_checkpoint
//! ├── replay_logs          skipped when the job was already terminal
//! ├── commit_batch         only on Success; claimed in the ledger first
//! └── expire_batches
//! ```
//!
//! The three fetches write nothing, so a missing or malformed input fails
//! the run before any record is touched. Every write is etag-checked or
//! idempotent, which makes redelivered responses safe.
//!
//! The file-store commit is the one external side effect that cannot be
//! repeated. A run first claims it with an etag-checked ledger write and
//! only the winner calls the file store; a run that finds a live claim
//! fails without settling, so its response comes back after the winner
//! has recorded the commit.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::PipelineServices;
use crate::cancellation::CancellationToken;
use crate::collaborators::download_json;
use crate::context::ExecutionContext;
use crate::core::{NodeOptions, NodeOutcome, NodeResult, NodeStatus};
use crate::errors::{CollaboratorError, NodeError, OrchestratorError};
use crate::model::{
    summary_blob_key, BatchRecord, Build, BuildLogLine, BuildResponse, BuildStatusRecord,
    CatalogCheckpoint, DataStandard, Job, JobState, LogLevel, WorkerExitCode,
};
use crate::nodes::{run_pipeline, Node, PipelineNode};

/// Shared state for one completion run.
#[derive(Debug, Clone)]
pub struct CompletionSubject {
    /// The worker's response.
    pub response: BuildResponse,
    /// Worker-uploaded build summary.
    pub summary: Option<Build>,
    /// Persisted status record.
    pub status_record: Option<BuildStatusRecord>,
    /// Persisted job.
    pub job: Option<Job>,
    /// The job was already terminal when fetched.
    pub job_was_terminal: bool,
}

impl CompletionSubject {
    /// Starts from a received response.
    #[must_use]
    pub fn new(response: BuildResponse) -> Self {
        Self {
            response,
            summary: None,
            status_record: None,
            job: None,
            job_was_terminal: false,
        }
    }

    fn job(&self) -> Result<&Job, NodeError> {
        self.job
            .as_ref()
            .ok_or_else(|| NodeError::invalid_state("job not loaded"))
    }

    fn summary(&self) -> Result<&Build, NodeError> {
        self.summary
            .as_ref()
            .ok_or_else(|| NodeError::invalid_state("build summary not loaded"))
    }
}

/// Result of one completion.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    /// The job the response named.
    pub job_id: String,
    /// Job state after the run, if the job could be loaded.
    pub state: Option<JobState>,
    /// Aggregate status of the run.
    pub status: NodeStatus,
    /// Full result tree.
    pub result: NodeResult,
}

impl CompletionOutcome {
    /// Returns true if the response may be acknowledged.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.status.is_failure()
    }
}

fn missing_as_protocol(err: CollaboratorError) -> NodeError {
    if err.is_not_found() {
        NodeError::protocol(err.to_string())
    } else {
        err.into()
    }
}

async fn is_fresh(ctx: &ExecutionContext<CompletionSubject>) -> bool {
    !ctx.subject().await.job_was_terminal
}

struct FetchSummary {
    services: Arc<PipelineServices>,
}

#[async_trait]
impl Node<CompletionSubject> for FetchSummary {
    fn name(&self) -> &str {
        "fetch_summary"
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<CompletionSubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let job_id = ctx.subject().await.response.job_id.clone();
        let summary: Build = download_json(self.services.blobs.as_ref(), &summary_blob_key(&job_id))
            .await
            .map_err(missing_as_protocol)?;
        if summary.job_id != job_id {
            return Err(NodeError::protocol(format!(
                "summary for job '{}' found under job '{job_id}'",
                summary.job_id
            )));
        }
        ctx.subject().await.summary = Some(summary);
        Ok(NodeStatus::Succeeded.into())
    }
}

struct FetchStatusRecord {
    services: Arc<PipelineServices>,
}

#[async_trait]
impl Node<CompletionSubject> for FetchStatusRecord {
    fn name(&self) -> &str {
        "fetch_status_record"
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<CompletionSubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let job_id = ctx.subject().await.response.job_id.clone();
        let record = self
            .services
            .build_statuses
            .get(&job_id, BuildStatusRecord::ROW_KEY)
            .await
            .map_err(missing_as_protocol)?;
        ctx.subject().await.status_record = Some(record);
        Ok(NodeStatus::Succeeded.into())
    }
}

struct FetchJob {
    services: Arc<PipelineServices>,
}

#[async_trait]
impl Node<CompletionSubject> for FetchJob {
    fn name(&self) -> &str {
        "fetch_job"
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<CompletionSubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let job_id = ctx.subject().await.response.job_id.clone();
        let job = self
            .services
            .jobs
            .get(&job_id, Job::ROW_KEY)
            .await
            .map_err(missing_as_protocol)?;

        let mut subject = ctx.subject().await;
        if !subject.summary()?.belongs_to(&job) {
            return Err(NodeError::protocol(format!(
                "summary data standard does not match job '{job_id}' ({})",
                job.data_standard
            )));
        }
        if let Some(standard) = subject.response.data_standard {
            if standard != job.data_standard {
                return Err(NodeError::protocol(format!(
                    "response names {standard} but job '{job_id}' targets {}",
                    job.data_standard
                )));
            }
        }
        if let Some(batch_id) = subject.response.batch_id.as_deref() {
            if job.batch_id.as_deref() != Some(batch_id) {
                return Err(NodeError::protocol(format!(
                    "response names batch '{batch_id}' but job '{job_id}' holds {:?}",
                    job.batch_id
                )));
            }
        }
        subject.job_was_terminal = job.state.is_terminal();
        if subject.job_was_terminal {
            info!(
                job_id = %job.id,
                state = %job.state,
                "Job already finalized; treating response as redelivery"
            );
        }
        subject.job = Some(job);
        Ok(NodeStatus::Succeeded.into())
    }
}

struct MergeStatuses {
    services: Arc<PipelineServices>,
}

#[async_trait]
impl Node<CompletionSubject> for MergeStatuses {
    fn name(&self) -> &str {
        "merge_statuses"
    }

    async fn should_execute(&self, ctx: &ExecutionContext<CompletionSubject>) -> bool {
        is_fresh(ctx).await
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<CompletionSubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let (mut record, statuses, exit_code) = {
            let subject = ctx.subject().await;
            let record = subject
                .status_record
                .clone()
                .ok_or_else(|| NodeError::invalid_state("status record not loaded"))?;
            (
                record,
                subject.summary()?.node_statuses.clone(),
                subject.response.exit_code,
            )
        };

        let added = record.merge(statuses);
        record.finish(exit_code);
        let stored = self.services.build_statuses.update(&record).await?;
        debug!(job_id = %stored.job_id, added, "Build statuses merged");

        ctx.subject().await.status_record = Some(stored);
        Ok(NodeStatus::Succeeded.into())
    }
}

struct UpdateJobState {
    services: Arc<PipelineServices>,
}

#[async_trait]
impl Node<CompletionSubject> for UpdateJobState {
    fn name(&self) -> &str {
        "update_job_state"
    }

    async fn should_execute(&self, ctx: &ExecutionContext<CompletionSubject>) -> bool {
        is_fresh(ctx).await
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<CompletionSubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let (mut job, exit_code) = {
            let subject = ctx.subject().await;
            (subject.job()?.clone(), subject.response.exit_code)
        };

        job.transition(exit_code.terminal_state())?;
        let stored = self.services.jobs.update(&job).await?;
        info!(
            job_id = %stored.id,
            data_standard = %stored.data_standard,
            state = %stored.state,
            "Job finalized"
        );

        ctx.subject().await.job = Some(stored);
        Ok(NodeStatus::Succeeded.into())
    }
}

struct SettleCheckpoint {
    services: Arc<PipelineServices>,
}

#[async_trait]
impl Node<CompletionSubject> for SettleCheckpoint {
    fn name(&self) -> &str {
        "settle_checkpoint"
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<CompletionSubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let (job_id, standard, succeeded) = {
            let subject = ctx.subject().await;
            let job = subject.job()?;
            (
                job.id.clone(),
                job.data_standard,
                subject.response.exit_code.is_success(),
            )
        };

        let Some(checkpoint) = self
            .services
            .checkpoints
            .try_get(CatalogCheckpoint::PARTITION, standard.slug())
            .await?
        else {
            return Ok(NodeStatus::Succeeded.into());
        };

        let mut settled = checkpoint.clone();
        settled.settle(&job_id, succeeded);
        if settled != checkpoint {
            self.services.checkpoints.update(&settled).await?;
            debug!(
                job_id = %job_id,
                data_standard = %standard,
                last_timestamp = ?settled.last_timestamp,
                "Catalog checkpoint settled"
            );
        }
        Ok(NodeStatus::Succeeded.into())
    }
}

struct ReplayLogs;

impl ReplayLogs {
    fn replay(standard: DataStandard, job_id: &str, line: &BuildLogLine) {
        let worker_timestamp = line.timestamp.to_rfc3339();
        let message = line.message.as_str();
        match line.level {
            LogLevel::Trace => {
                trace!(data_standard = %standard, job_id = %job_id, worker_timestamp = %worker_timestamp, "{message}");
            }
            LogLevel::Debug => {
                debug!(data_standard = %standard, job_id = %job_id, worker_timestamp = %worker_timestamp, "{message}");
            }
            LogLevel::Information => {
                info!(data_standard = %standard, job_id = %job_id, worker_timestamp = %worker_timestamp, "{message}");
            }
            LogLevel::Warning => {
                warn!(data_standard = %standard, job_id = %job_id, worker_timestamp = %worker_timestamp, "{message}");
            }
            LogLevel::Error | LogLevel::Critical => {
                error!(data_standard = %standard, job_id = %job_id, worker_timestamp = %worker_timestamp, "{message}");
            }
        }
    }
}

#[async_trait]
impl Node<CompletionSubject> for ReplayLogs {
    fn name(&self) -> &str {
        "replay_logs"
    }

    async fn should_execute(&self, ctx: &ExecutionContext<CompletionSubject>) -> bool {
        is_fresh(ctx).await
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<CompletionSubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let subject = ctx.subject().await;
        let job = subject.job()?;
        for line in &subject.summary()?.log_lines {
            Self::replay(job.data_standard, &job.id, line);
        }
        Ok(NodeStatus::Succeeded.into())
    }
}

struct CommitBatch {
    services: Arc<PipelineServices>,
}

impl CommitBatch {
    /// Claims the commit of `batch_id` for this run.
    ///
    /// Returns `None` if the batch is already committed. Fails with a lost
    /// race if another run holds a live claim or wins the ledger write.
    async fn claim(
        &self,
        job_id: &str,
        standard: DataStandard,
        batch_id: &str,
    ) -> Result<Option<BatchRecord>, NodeError> {
        let now = Utc::now();
        let ledger = self
            .services
            .batches
            .try_get(&BatchRecord::partition_for(standard), batch_id)
            .await?;

        let mut batch = match ledger {
            Some(batch) if batch.committed => return Ok(None),
            Some(batch) if batch.is_commit_claimed(now) => {
                info!(
                    job_id = %job_id,
                    batch_id = %batch_id,
                    claimed_at = ?batch.commit_claimed_at,
                    "Batch commit held by another run"
                );
                return Err(CollaboratorError::Conflict {
                    key: batch_id.to_string(),
                }
                .into());
            }
            Some(batch) => batch,
            None => BatchRecord::new(batch_id, job_id, standard, now + self.services.batch_expiry),
        };

        batch.commit_claimed_at = Some(now);
        let written = if batch.etag.is_some() {
            self.services.batches.update(&batch).await
        } else {
            self.services.batches.add(&batch).await
        };
        match written {
            Ok(claimed) => Ok(Some(claimed)),
            Err(err) => {
                if err.is_lost_race() {
                    info!(job_id = %job_id, batch_id = %batch_id, "Lost batch commit claim");
                }
                Err(err.into())
            }
        }
    }
}

#[async_trait]
impl Node<CompletionSubject> for CommitBatch {
    fn name(&self) -> &str {
        "commit_batch"
    }

    async fn should_execute(&self, ctx: &ExecutionContext<CompletionSubject>) -> bool {
        let subject = ctx.subject().await;
        subject.response.exit_code == WorkerExitCode::Success
            && subject.job.as_ref().is_some_and(|job| job.batch_id.is_some())
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<CompletionSubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let (job_id, standard, batch_id) = {
            let subject = ctx.subject().await;
            let job = subject.job()?;
            let batch_id = job
                .batch_id
                .clone()
                .ok_or_else(|| NodeError::invalid_state("job has no batch id"))?;
            (job.id.clone(), job.data_standard, batch_id)
        };

        let Some(claimed) = self.claim(&job_id, standard, &batch_id).await? else {
            debug!(job_id = %job_id, batch_id = %batch_id, "Batch already committed");
            return Ok(NodeStatus::Succeeded.into());
        };

        if let Err(err) = self.services.file_store.commit_batch(&batch_id).await {
            let mut released = claimed;
            released.commit_claimed_at = None;
            if let Err(release_err) = self.services.batches.update(&released).await {
                warn!(
                    job_id = %job_id,
                    batch_id = %batch_id,
                    error = %release_err,
                    "Failed to release batch commit claim"
                );
            }
            return Err(err.into());
        }

        let mut committed = claimed;
        committed.committed = true;
        committed.commit_claimed_at = None;
        if let Err(err) = self.services.batches.update(&committed).await {
            error!(
                job_id = %job_id,
                batch_id = %batch_id,
                error = %err,
                "Batch committed but the ledger was not updated"
            );
            return Err(err.into());
        }
        info!(job_id = %job_id, batch_id = %batch_id, "Batch committed");
        Ok(NodeStatus::Succeeded.into())
    }
}

struct ExpireBatches {
    services: Arc<PipelineServices>,
}

#[async_trait]
impl Node<CompletionSubject> for ExpireBatches {
    fn name(&self) -> &str {
        "expire_batches"
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<CompletionSubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let (standard, own_batch) = {
            let subject = ctx.subject().await;
            let job = subject.job()?;
            (job.data_standard, job.batch_id.clone())
        };

        let now = Utc::now();
        let due: Vec<BatchRecord> = self
            .services
            .batches
            .query(&BatchRecord::partition_for(standard))
            .await?
            .into_iter()
            .filter(|b| b.is_due_for_expiry(now) && own_batch.as_deref() != Some(b.batch_id.as_str()))
            .collect();

        let mut failures = 0_usize;
        for mut batch in due {
            let expired = match self.services.file_store.expire_batch(&batch.batch_id).await {
                Ok(()) => {
                    batch.expired = true;
                    self.services.batches.update(&batch).await.map(|_| ())
                }
                Err(err) => Err(err),
            };
            match expired {
                Ok(()) => info!(
                    data_standard = %standard,
                    batch_id = %batch.batch_id,
                    "Expired batch"
                ),
                Err(err) => {
                    failures += 1;
                    warn!(
                        data_standard = %standard,
                        batch_id = %batch.batch_id,
                        error = %err,
                        "Failed to expire batch"
                    );
                }
            }
        }

        if failures > 0 {
            Ok(NodeStatus::SucceededWithErrors.into())
        } else {
            Ok(NodeStatus::Succeeded.into())
        }
    }
}

/// Builds and runs the completion node tree.
pub struct CompletionPipeline {
    services: Arc<PipelineServices>,
    root: PipelineNode<CompletionSubject>,
}

impl CompletionPipeline {
    /// Name of the root node.
    pub const ROOT: &'static str = "completion";

    /// Creates the pipeline.
    #[must_use]
    pub fn new(services: Arc<PipelineServices>) -> Self {
        let root = PipelineNode::new(Self::ROOT)
            .with_options(NodeOptions::inherit().continue_on_failure(false))
            .with_child(FetchSummary {
                services: Arc::clone(&services),
            })
            .with_child(FetchStatusRecord {
                services: Arc::clone(&services),
            })
            .with_child(FetchJob {
                services: Arc::clone(&services),
            })
            .with_child(MergeStatuses {
                services: Arc::clone(&services),
            })
            .with_child(UpdateJobState {
                services: Arc::clone(&services),
            })
            .with_child(SettleCheckpoint {
                services: Arc::clone(&services),
            })
            .with_child(ReplayLogs)
            .with_child(CommitBatch {
                services: Arc::clone(&services),
            })
            .with_child(ExpireBatches {
                services: Arc::clone(&services),
            });
        Self { services, root }
    }

    /// Ingests one worker response.
    ///
    /// # Errors
    ///
    /// Returns an error only when a node fault propagates out of the tree;
    /// ordinary failures are reported through the outcome's status.
    pub async fn run(
        &self,
        response: BuildResponse,
        cancellation: &CancellationToken,
    ) -> Result<CompletionOutcome, OrchestratorError> {
        let job_id = response.job_id.clone();
        let ctx = ExecutionContext::new(CompletionSubject::new(response))
            .with_options(self.services.execution)
            .with_event_sink(Arc::clone(&self.services.event_sink))
            .with_cancellation(cancellation.clone())
            .with_run_label(job_id.clone());

        let result = run_pipeline(&self.root, &ctx).await?;
        let subject = ctx.into_subject();
        let state = subject.job.as_ref().map(|job| job.state);
        if result.status.is_failure() {
            warn!(job_id = %job_id, errors = ?result.errors(), "Completion failed");
        } else {
            info!(job_id = %job_id, state = ?state, status = %result.status, "Completion finished");
        }

        Ok(CompletionOutcome {
            job_id,
            state,
            status: result.status,
            result,
        })
    }
}

impl std::fmt::Debug for CompletionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionPipeline")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{upload_json, BatchState, MockFileStoreClient, TableStore};
    use crate::model::{BuildNodeStatus, BuildState};
    use crate::testing::{CapturedLogs, FileStoreCall, InMemoryEnvironment};
    use chrono::{DateTime, Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    struct Seeded {
        env: InMemoryEnvironment,
        batch_id: String,
    }

    /// Seeds the stores as a finished assembly would leave them, plus the
    /// worker's summary blob.
    async fn seeded(job_id: &str, standard: DataStandard) -> Seeded {
        let env = InMemoryEnvironment::new();
        let batch_id = env.file_store.create_open_batch(standard, job_id);

        let mut job = Job::new(job_id, standard, vec![], None, "corr");
        job.transition(JobState::InProgress).unwrap();
        job.batch_id = Some(batch_id.clone());
        job.catalog_timestamp = Some(ts(50));
        env.jobs.upsert(&job).await.unwrap();

        env.build_statuses
            .upsert(&BuildStatusRecord::started(job_id, standard))
            .await
            .unwrap();
        env.batches
            .upsert(&BatchRecord::new(
                batch_id.clone(),
                job_id,
                standard,
                Utc::now() + Duration::days(7),
            ))
            .await
            .unwrap();

        let mut checkpoint = CatalogCheckpoint::empty(standard);
        checkpoint.last_timestamp = Some(ts(10));
        checkpoint.mark_pending(job_id, ts(50));
        env.checkpoints.upsert(&checkpoint).await.unwrap();

        let mut summary = Build::for_job(&job);
        summary.state = BuildState::Succeeded;
        summary.node_statuses = vec![
            BuildNodeStatus::new("download", NodeStatus::Succeeded, ts(60)),
            BuildNodeStatus::new("package", NodeStatus::Succeeded, ts(61)),
        ];
        summary.log_lines = vec![
            BuildLogLine {
                timestamp: ts(60),
                level: LogLevel::Information,
                message: "first worker line".to_string(),
            },
            BuildLogLine {
                timestamp: ts(61),
                level: LogLevel::Warning,
                message: "second worker line".to_string(),
            },
        ];
        upload_json(env.blobs.as_ref(), &summary_blob_key(job_id), &summary)
            .await
            .unwrap();

        Seeded { env, batch_id }
    }

    fn response(job_id: &str, exit_code: WorkerExitCode) -> BuildResponse {
        BuildResponse {
            job_id: job_id.to_string(),
            batch_id: None,
            data_standard: None,
            exit_code,
        }
    }

    fn outcome_error(outcome: &CompletionOutcome, node: &str) -> String {
        outcome.result.child(node).unwrap().error.clone().unwrap()
    }

    async fn complete(env: &InMemoryEnvironment, resp: BuildResponse) -> CompletionOutcome {
        CompletionPipeline::new(Arc::new(env.services()))
            .run(resp, &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_finalizes_job_and_commits_once() {
        let Seeded { env, batch_id } = seeded("job-1", DataStandard::S100).await;

        let outcome = complete(&env, response("job-1", WorkerExitCode::Success)).await;

        assert_eq!(outcome.status, NodeStatus::Succeeded);
        assert_eq!(outcome.state, Some(JobState::Succeeded));
        assert_eq!(
            env.jobs.get("job-1", Job::ROW_KEY).await.unwrap().state,
            JobState::Succeeded
        );
        assert_eq!(env.file_store.commits_of(&batch_id), 1);
        assert_eq!(env.file_store.state(&batch_id), Some(BatchState::Committed));

        let record = env
            .build_statuses
            .get("job-1", BuildStatusRecord::ROW_KEY)
            .await
            .unwrap();
        assert!(record.is_finished());
        assert_eq!(record.exit_code, Some(WorkerExitCode::Success));
        let nodes: Vec<&str> = record.node_statuses.iter().map(|s| s.node_id.as_str()).collect();
        assert_eq!(nodes, vec!["download", "package"]);
        assert!(record.node_statuses[0].sequence < record.node_statuses[1].sequence);

        let checkpoint = env.checkpoints.get("checkpoints", "s100").await.unwrap();
        assert_eq!(checkpoint.last_timestamp, Some(ts(50)));
        assert_eq!(checkpoint.pending_job_id, None);
    }

    #[tokio::test]
    async fn test_failure_never_commits() {
        let Seeded { env, batch_id } = seeded("job-1", DataStandard::S63).await;

        let outcome = complete(&env, response("job-1", WorkerExitCode::Failed)).await;

        assert_eq!(outcome.state, Some(JobState::Failed));
        assert_eq!(
            outcome.result.child("commit_batch").unwrap().status,
            NodeStatus::NotRun
        );
        assert_eq!(env.file_store.commits_of(&batch_id), 0);
        assert_eq!(env.file_store.state(&batch_id), Some(BatchState::Open));

        let checkpoint = env.checkpoints.get("checkpoints", "s63").await.unwrap();
        assert_eq!(checkpoint.last_timestamp, Some(ts(10)));
        assert_eq!(checkpoint.pending_job_id, None);
    }

    #[tokio::test]
    async fn test_not_run_exit_code_fails_job() {
        let Seeded { env, .. } = seeded("job-1", DataStandard::S57).await;
        let outcome = complete(&env, response("job-1", WorkerExitCode::NotRun)).await;
        assert_eq!(outcome.state, Some(JobState::Failed));
    }

    #[tokio::test]
    async fn test_missing_summary_aborts_before_writes() {
        let env = InMemoryEnvironment::new();
        let mut job = Job::new("job-1", DataStandard::S57, vec![], None, "corr");
        job.transition(JobState::InProgress).unwrap();
        env.jobs.upsert(&job).await.unwrap();

        let outcome = complete(&env, response("job-1", WorkerExitCode::Success)).await;

        assert_eq!(outcome.status, NodeStatus::Failed);
        assert!(!outcome.is_settled());
        assert_eq!(
            outcome.result.child("fetch_summary").unwrap().status,
            NodeStatus::Failed
        );
        for node in ["fetch_job", "update_job_state", "commit_batch"] {
            assert_eq!(outcome.result.child(node).unwrap().status, NodeStatus::NotRun);
        }
        assert_eq!(
            env.jobs.get("job-1", Job::ROW_KEY).await.unwrap().state,
            JobState::InProgress
        );
        assert!(env.file_store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_status_record_aborts_before_writes() {
        let Seeded { env, batch_id } = seeded("job-1", DataStandard::S57).await;
        let mut services = env.services();
        services.build_statuses =
            Arc::new(crate::collaborators::InMemoryTable::<BuildStatusRecord>::new());

        let outcome = CompletionPipeline::new(Arc::new(services))
            .run(response("job-1", WorkerExitCode::Success), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, NodeStatus::Failed);
        let error = outcome.result.child("fetch_status_record").unwrap().error.clone();
        assert!(error.unwrap().starts_with("Protocol error"));
        assert_eq!(
            env.jobs.get("job-1", Job::ROW_KEY).await.unwrap().state,
            JobState::InProgress
        );
        assert_eq!(env.file_store.commits_of(&batch_id), 0);
    }

    #[tokio::test]
    async fn test_mismatched_standard_is_a_protocol_fault() {
        let Seeded { env, .. } = seeded("job-1", DataStandard::S57).await;
        let mut resp = response("job-1", WorkerExitCode::Success);
        resp.data_standard = Some(DataStandard::S100);

        let outcome = complete(&env, resp).await;

        assert_eq!(outcome.status, NodeStatus::Failed);
        assert_eq!(
            outcome.result.child("fetch_job").unwrap().status,
            NodeStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_redelivered_response_is_a_no_op() {
        let Seeded { env, batch_id } = seeded("job-1", DataStandard::S100).await;

        complete(&env, response("job-1", WorkerExitCode::Success)).await;
        let again = complete(&env, response("job-1", WorkerExitCode::Success)).await;

        assert!(again.is_settled());
        for node in ["merge_statuses", "update_job_state", "replay_logs"] {
            assert_eq!(again.result.child(node).unwrap().status, NodeStatus::NotRun);
        }
        assert_eq!(env.file_store.commits_of(&batch_id), 1);
        let record = env
            .build_statuses
            .get("job-1", BuildStatusRecord::ROW_KEY)
            .await
            .unwrap();
        assert_eq!(record.node_statuses.len(), 2);
    }

    #[tokio::test]
    async fn test_commit_called_exactly_once_on_success() {
        let Seeded { env, batch_id } = seeded("job-1", DataStandard::S57).await;
        let mut file_store = MockFileStoreClient::new();
        let expected = batch_id.clone();
        file_store
            .expect_commit_batch()
            .withf(move |id| id == expected)
            .times(1)
            .returning(|_| Ok(()));
        file_store.expect_expire_batch().never();

        let mut services = env.services();
        services.file_store = Arc::new(file_store);
        let outcome = CompletionPipeline::new(Arc::new(services))
            .run(response("job-1", WorkerExitCode::Success), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.status, NodeStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_concurrent_completions_commit_once() {
        let Seeded { env, batch_id } = seeded("job-1", DataStandard::S100).await;
        env.file_store
            .set_commit_delay(std::time::Duration::from_millis(30));
        let pipeline = CompletionPipeline::new(Arc::new(env.services()));
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(
            pipeline.run(response("job-1", WorkerExitCode::Success), &cancel),
            pipeline.run(response("job-1", WorkerExitCode::Success), &cancel),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(env.file_store.commits_of(&batch_id), 1);
        let settled = [&a, &b].iter().filter(|o| o.is_settled()).count();
        assert_eq!(settled, 1);

        // The loser's response is redelivered and finds the commit recorded.
        let retried = pipeline
            .run(response("job-1", WorkerExitCode::Success), &cancel)
            .await
            .unwrap();
        assert!(retried.is_settled());
        assert_eq!(env.file_store.commits_of(&batch_id), 1);

        let ledger = env.batches.get("batches-s100", &batch_id).await.unwrap();
        assert!(ledger.committed);
        assert_eq!(ledger.commit_claimed_at, None);
    }

    #[tokio::test]
    async fn test_failed_commit_releases_claim_for_retry() {
        let Seeded { env, batch_id } = seeded("job-1", DataStandard::S57).await;
        env.file_store.set_fail_commit(true);

        let first = complete(&env, response("job-1", WorkerExitCode::Success)).await;

        assert!(!first.is_settled());
        assert_eq!(
            outcome_error(&first, "commit_batch"),
            "file store unavailable: commit refused"
        );
        let ledger = env.batches.get("batches-s57", &batch_id).await.unwrap();
        assert!(!ledger.committed);
        assert_eq!(ledger.commit_claimed_at, None);

        env.file_store.set_fail_commit(false);
        let retried = complete(&env, response("job-1", WorkerExitCode::Success)).await;

        assert!(retried.is_settled());
        assert_eq!(env.file_store.commits_of(&batch_id), 2);
        assert_eq!(env.file_store.state(&batch_id), Some(BatchState::Committed));
        assert!(env.batches.get("batches-s57", &batch_id).await.unwrap().committed);
    }

    #[tokio::test]
    async fn test_live_claim_blocks_commit_until_lease_lapses() {
        let Seeded { env, batch_id } = seeded("job-1", DataStandard::S63).await;
        let mut ledger = env.batches.get("batches-s63", &batch_id).await.unwrap();
        ledger.commit_claimed_at = Some(Utc::now());
        let ledger = env.batches.update(&ledger).await.unwrap();

        let blocked = complete(&env, response("job-1", WorkerExitCode::Success)).await;
        assert!(!blocked.is_settled());
        assert_eq!(env.file_store.commits_of(&batch_id), 0);

        let mut stale = ledger;
        stale.commit_claimed_at = Some(Utc::now() - BatchRecord::commit_lease() - Duration::seconds(1));
        env.batches.update(&stale).await.unwrap();

        let resumed = complete(&env, response("job-1", WorkerExitCode::Success)).await;
        assert!(resumed.is_settled());
        assert_eq!(env.file_store.commits_of(&batch_id), 1);
    }

    #[tokio::test]
    async fn test_mismatched_batch_is_a_protocol_fault() {
        let Seeded { env, batch_id } = seeded("job-1", DataStandard::S57).await;
        let mut resp = response("job-1", WorkerExitCode::Success);
        resp.batch_id = Some("some-other-batch".to_string());

        let outcome = complete(&env, resp).await;

        assert_eq!(outcome.status, NodeStatus::Failed);
        assert!(outcome_error(&outcome, "fetch_job").starts_with("Protocol error"));
        assert_eq!(
            env.jobs.get("job-1", Job::ROW_KEY).await.unwrap().state,
            JobState::InProgress
        );
        assert_eq!(env.file_store.commits_of(&batch_id), 0);

        let mut matching = response("job-1", WorkerExitCode::Success);
        matching.batch_id = Some(batch_id.clone());
        assert!(complete(&env, matching).await.is_settled());
    }

    #[tokio::test]
    async fn test_expires_old_batches_and_tolerates_failures() {
        let Seeded { env, batch_id } = seeded("job-1", DataStandard::S63).await;
        let past = Utc::now() - Duration::hours(1);
        let old = env.file_store.create_open_batch(DataStandard::S63, "job-0");
        let stuck = env.file_store.create_open_batch(DataStandard::S63, "job-00");
        for (id, job) in [(&old, "job-0"), (&stuck, "job-00")] {
            env.batches
                .upsert(&BatchRecord::new(id.clone(), job, DataStandard::S63, past))
                .await
                .unwrap();
        }
        env.file_store.fail_expire_for(&stuck);

        let outcome = complete(&env, response("job-1", WorkerExitCode::Success)).await;

        assert_eq!(outcome.status, NodeStatus::SucceededWithErrors);
        assert_eq!(
            outcome.result.child("expire_batches").unwrap().status,
            NodeStatus::SucceededWithErrors
        );
        assert_eq!(outcome.state, Some(JobState::Succeeded));
        assert_eq!(env.file_store.state(&old), Some(BatchState::Expired));
        assert_eq!(env.file_store.state(&stuck), Some(BatchState::Open));
        assert_eq!(env.file_store.state(&batch_id), Some(BatchState::Committed));

        let ledger = env.batches.get("batches-s63", &old).await.unwrap();
        assert!(ledger.expired);
        assert!(env
            .file_store
            .calls()
            .contains(&FileStoreCall::Expire(stuck.clone())));
    }

    #[tokio::test]
    async fn test_worker_logs_replayed_in_order() {
        let Seeded { env, .. } = seeded("job-1", DataStandard::S57).await;
        let logs = CapturedLogs::default();
        let _guard = tracing::subscriber::set_default(logs.subscriber());

        complete(&env, response("job-1", WorkerExitCode::Success)).await;

        let contents = logs.contents();
        let first = contents.find("first worker line").unwrap();
        let second = contents.find("second worker line").unwrap();
        assert!(first < second);
        let line = contents
            .lines()
            .find(|l| l.contains("second worker line"))
            .unwrap();
        assert!(line.contains("WARN"));
        assert!(line.contains("job_id=job-1"));
        assert!(line.contains("data_standard=S57"));
    }
}
