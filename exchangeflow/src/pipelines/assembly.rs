//! The Assembly pipeline: request in, Job persisted, build dispatched.
//!
//! ```text
//! assembly (continue_on_failure)
//! ├── lookup_checkpoint
//! ├── query_catalog        only while Created
//! ├── claim_checkpoint     only while Created
//! ├── allocate_batch       only while Created
//! ├── persist_job          always
//! ├── persist_build        only once InProgress
//! └── dispatch_request     only once InProgress
//! ```
//!
//! Nodes that detect a failure move the Job to `Failed` themselves, so the
//! gates on later nodes short-circuit and `persist_job` records the final
//! state either way. A fault that escapes the tree is recorded the same way
//! before it is returned.
//!
//! The checkpoint is claimed before a batch is allocated, so of two jobs
//! racing for one catalog snapshot the loser ends `Duplicate` without
//! touching the file store.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::PipelineServices;
use crate::cancellation::CancellationToken;
use crate::collaborators::{upload_json, CatalogStatus};
use crate::context::ExecutionContext;
use crate::core::{NodeOptions, NodeOutcome, NodeResult, NodeStatus};
use crate::errors::{CollaboratorError, NodeError, OrchestratorError};
use crate::model::{
    build_blob_key, AssemblyRequest, BatchRecord, Build, BuildRequest, BuildState,
    BuildStatusRecord, CatalogCheckpoint, Job, JobProjection, JobState,
};
use crate::nodes::{run_pipeline, Node, PipelineNode};

/// Shared state for one assembly run.
#[derive(Debug, Clone)]
pub struct AssemblySubject {
    /// The job being assembled.
    pub job: Job,
    /// Its build description.
    pub build: Build,
    /// Checkpoint for the job's data standard, as last read.
    pub checkpoint: CatalogCheckpoint,
}

impl AssemblySubject {
    /// Starts from a freshly created job.
    #[must_use]
    pub fn new(job: Job) -> Self {
        let build = Build::for_job(&job);
        let checkpoint = CatalogCheckpoint::empty(job.data_standard);
        Self {
            job,
            build,
            checkpoint,
        }
    }
}

/// Result of one assembly.
#[derive(Debug, Clone)]
pub struct AssemblyOutcome {
    /// Caller-visible job view.
    pub projection: JobProjection,
    /// Aggregate status of the run.
    pub status: NodeStatus,
    /// Full result tree.
    pub result: NodeResult,
}

async fn job_state(ctx: &ExecutionContext<AssemblySubject>) -> JobState {
    ctx.subject().await.job.state
}

/// Releases the checkpoint if this job had claimed it.
async fn release_checkpoint(services: &PipelineServices, ctx: &ExecutionContext<AssemblySubject>) {
    let (job_id, standard, checkpoint) = {
        let subject = ctx.subject().await;
        (
            subject.job.id.clone(),
            subject.job.data_standard,
            subject.checkpoint.clone(),
        )
    };
    if checkpoint.pending_job_id.as_deref() != Some(job_id.as_str()) {
        return;
    }

    let mut released = checkpoint;
    released.settle(&job_id, false);
    match services.checkpoints.update(&released).await {
        Ok(stored) => ctx.subject().await.checkpoint = stored,
        Err(err) => warn!(
            job_id = %job_id,
            data_standard = %standard,
            error = %err,
            "Failed to release catalog checkpoint"
        ),
    }
}

/// Marks the job failed, persists that, and releases the checkpoint if this
/// job had claimed it.
async fn fail_and_record(services: &PipelineServices, ctx: &ExecutionContext<AssemblySubject>) {
    let job = {
        let mut subject = ctx.subject().await;
        subject.job.fail();
        subject.job.clone()
    };

    let stored = if job.etag.is_some() {
        services.jobs.update(&job).await
    } else {
        services.jobs.upsert(&job).await
    };
    match stored {
        Ok(stored) => ctx.subject().await.job.etag = stored.etag,
        Err(err) => error!(job_id = %job.id, error = %err, "Failed to record job failure"),
    }

    release_checkpoint(services, ctx).await;
}

struct LookupCheckpoint {
    services: Arc<PipelineServices>,
}

#[async_trait]
impl Node<AssemblySubject> for LookupCheckpoint {
    fn name(&self) -> &str {
        "lookup_checkpoint"
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<AssemblySubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let standard = ctx.subject().await.job.data_standard;
        let found = self
            .services
            .checkpoints
            .try_get(CatalogCheckpoint::PARTITION, standard.slug())
            .await;

        let mut subject = ctx.subject().await;
        match found {
            Ok(Some(checkpoint)) => {
                subject.checkpoint = checkpoint;
                Ok(NodeStatus::Succeeded.into())
            }
            Ok(None) => Ok(NodeStatus::Succeeded.into()),
            Err(err) => {
                subject.job.fail();
                Err(err.into())
            }
        }
    }
}

struct QueryCatalog {
    services: Arc<PipelineServices>,
}

#[async_trait]
impl Node<AssemblySubject> for QueryCatalog {
    fn name(&self) -> &str {
        "query_catalog"
    }

    async fn should_execute(&self, ctx: &ExecutionContext<AssemblySubject>) -> bool {
        job_state(ctx).await == JobState::Created
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<AssemblySubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let query = {
            let subject = ctx.subject().await;
            self.services
                .standards
                .get(subject.job.data_standard)
                .catalog_query(&subject.job, subject.checkpoint.last_timestamp)
        };
        let response = self.services.catalog.get_changes_since(&query).await;

        let mut guard = ctx.subject().await;
        let subject = &mut *guard;
        let changes = match response {
            Ok(changes) => changes,
            Err(err) => {
                subject.job.fail();
                return Err(err.into());
            }
        };

        match (changes.status, changes.timestamp) {
            (CatalogStatus::NotModified, _) => {
                subject.job.transition(JobState::UpToDate)?;
                info!(
                    job_id = %subject.job.id,
                    data_standard = %subject.job.data_standard,
                    since = ?query.since,
                    "Catalog unchanged; nothing to build"
                );
            }
            (CatalogStatus::Changed, Some(timestamp)) => {
                subject.job.catalog_timestamp = Some(timestamp);
                subject.build.products = changes.products;
            }
            (CatalogStatus::Changed, None) => {
                subject.job.fail();
                return Err(NodeError::protocol(
                    "catalog reported a change without a timestamp",
                ));
            }
        }
        Ok(NodeStatus::Succeeded.into())
    }
}

struct ClaimCheckpoint {
    services: Arc<PipelineServices>,
}

impl ClaimCheckpoint {
    /// Attempts per run. A lost race re-reads the checkpoint and tries again.
    const ATTEMPTS: usize = 3;
}

#[async_trait]
impl Node<AssemblySubject> for ClaimCheckpoint {
    fn name(&self) -> &str {
        "claim_checkpoint"
    }

    async fn should_execute(&self, ctx: &ExecutionContext<AssemblySubject>) -> bool {
        job_state(ctx).await == JobState::Created
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<AssemblySubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let (job_id, standard, timestamp, mut checkpoint) = {
            let mut subject = ctx.subject().await;
            let Some(timestamp) = subject.job.catalog_timestamp else {
                subject.job.fail();
                return Err(NodeError::invalid_state("no catalog timestamp to claim"));
            };
            (
                subject.job.id.clone(),
                subject.job.data_standard,
                timestamp,
                subject.checkpoint.clone(),
            )
        };

        for _ in 0..Self::ATTEMPTS {
            if checkpoint.is_pending_elsewhere(&job_id, timestamp) {
                let mut subject = ctx.subject().await;
                subject.job.transition(JobState::Duplicate)?;
                info!(
                    job_id = %job_id,
                    pending_job_id = ?checkpoint.pending_job_id,
                    catalog_timestamp = %timestamp,
                    "Catalog snapshot already being built"
                );
                subject.checkpoint = checkpoint;
                return Ok(NodeStatus::Succeeded.into());
            }

            let mut claimed = checkpoint.clone();
            claimed.mark_pending(&job_id, timestamp);
            let written = if claimed.etag.is_some() {
                self.services.checkpoints.update(&claimed).await
            } else {
                self.services.checkpoints.add(&claimed).await
            };

            match written {
                Ok(stored) => {
                    ctx.subject().await.checkpoint = stored;
                    return Ok(NodeStatus::Succeeded.into());
                }
                Err(err) if err.is_lost_race() => {
                    debug!(job_id = %job_id, data_standard = %standard, "Checkpoint claim raced; re-reading");
                    let reread = self
                        .services
                        .checkpoints
                        .try_get(CatalogCheckpoint::PARTITION, standard.slug())
                        .await;
                    match reread {
                        Ok(found) => {
                            checkpoint = found.unwrap_or_else(|| CatalogCheckpoint::empty(standard));
                        }
                        Err(err) => {
                            ctx.subject().await.job.fail();
                            return Err(err.into());
                        }
                    }
                }
                Err(err) => {
                    ctx.subject().await.job.fail();
                    return Err(err.into());
                }
            }
        }

        ctx.subject().await.job.fail();
        Err(CollaboratorError::Conflict {
            key: format!("{}/{}", CatalogCheckpoint::PARTITION, standard.slug()),
        }
        .into())
    }
}

struct AllocateBatch {
    services: Arc<PipelineServices>,
}

#[async_trait]
impl Node<AssemblySubject> for AllocateBatch {
    fn name(&self) -> &str {
        "allocate_batch"
    }

    async fn should_execute(&self, ctx: &ExecutionContext<AssemblySubject>) -> bool {
        job_state(ctx).await == JobState::Created
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<AssemblySubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let (standard, job_id) = {
            let subject = ctx.subject().await;
            (subject.job.data_standard, subject.job.id.clone())
        };
        let allocated = self.services.file_store.create_batch(standard, &job_id).await;

        match allocated {
            Ok(batch_id) => {
                let mut subject = ctx.subject().await;
                subject.job.batch_id = Some(batch_id.clone());
                subject.build.batch_id = Some(batch_id.clone());
                subject.job.transition(JobState::InProgress)?;
                info!(job_id = %job_id, batch_id = %batch_id, "Batch allocated");
                Ok(NodeStatus::Succeeded.into())
            }
            Err(err) => {
                ctx.subject().await.job.fail();
                release_checkpoint(&self.services, ctx).await;
                Err(err.into())
            }
        }
    }
}

struct PersistJob {
    services: Arc<PipelineServices>,
}

#[async_trait]
impl Node<AssemblySubject> for PersistJob {
    fn name(&self) -> &str {
        "persist_job"
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<AssemblySubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let job = ctx.subject().await.job.clone();
        let stored = self.services.jobs.upsert(&job).await;

        let mut subject = ctx.subject().await;
        match stored {
            Ok(stored) => {
                subject.job.etag = stored.etag;
                Ok(NodeStatus::Succeeded.into())
            }
            Err(err) => {
                subject.job.fail();
                Err(err.into())
            }
        }
    }
}

struct PersistBuild {
    services: Arc<PipelineServices>,
}

impl PersistBuild {
    async fn persist(&self, job: &Job, build: &Build) -> Result<(), NodeError> {
        let services = &self.services;
        let batch_id = job
            .batch_id
            .clone()
            .ok_or_else(|| NodeError::invalid_state("in-progress job has no batch id"))?;

        services
            .build_statuses
            .upsert(&BuildStatusRecord::started(&job.id, job.data_standard))
            .await?;
        upload_json(services.blobs.as_ref(), &build_blob_key(&job.id), build).await?;
        services
            .batches
            .upsert(&BatchRecord::new(
                batch_id,
                &job.id,
                job.data_standard,
                Utc::now() + services.batch_expiry,
            ))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Node<AssemblySubject> for PersistBuild {
    fn name(&self) -> &str {
        "persist_build"
    }

    async fn should_execute(&self, ctx: &ExecutionContext<AssemblySubject>) -> bool {
        job_state(ctx).await == JobState::InProgress
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<AssemblySubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let (job, mut build) = {
            let subject = ctx.subject().await;
            (subject.job.clone(), subject.build.clone())
        };
        build.state = BuildState::Scheduled;

        match self.persist(&job, &build).await {
            Ok(()) => {
                ctx.subject().await.build = build;
                Ok(NodeStatus::Succeeded.into())
            }
            Err(err) => {
                fail_and_record(&self.services, ctx).await;
                Err(err)
            }
        }
    }
}

struct DispatchRequest {
    services: Arc<PipelineServices>,
}

impl DispatchRequest {
    async fn dispatch(&self, job: &Job) -> Result<String, NodeError> {
        let profile = self.services.standards.get(job.data_standard);
        let batch_id = job
            .batch_id
            .clone()
            .ok_or_else(|| NodeError::invalid_state("in-progress job has no batch id"))?;
        let request = BuildRequest {
            job_id: job.id.clone(),
            batch_id,
            data_standard: job.data_standard,
            workspace_key: build_blob_key(&job.id),
            exchange_set_name_template: profile.exchange_set_name_template().to_string(),
        };
        let body = serde_json::to_string(&request).map_err(CollaboratorError::from)?;
        self.services
            .queues
            .enqueue(profile.worker_queue(), body)
            .await?;
        Ok(profile.worker_queue().to_string())
    }
}

#[async_trait]
impl Node<AssemblySubject> for DispatchRequest {
    fn name(&self) -> &str {
        "dispatch_request"
    }

    async fn should_execute(&self, ctx: &ExecutionContext<AssemblySubject>) -> bool {
        job_state(ctx).await == JobState::InProgress
    }

    async fn perform_execute(
        &self,
        ctx: &ExecutionContext<AssemblySubject>,
    ) -> Result<NodeOutcome, NodeError> {
        let job = ctx.subject().await.job.clone();
        match self.dispatch(&job).await {
            Ok(queue) => {
                info!(job_id = %job.id, queue = %queue, "Build request dispatched");
                Ok(NodeStatus::Succeeded.into())
            }
            Err(err) => {
                fail_and_record(&self.services, ctx).await;
                Err(err)
            }
        }
    }
}

/// Builds and runs the assembly node tree.
pub struct AssemblyPipeline {
    services: Arc<PipelineServices>,
    root: PipelineNode<AssemblySubject>,
}

impl AssemblyPipeline {
    /// Name of the root node.
    pub const ROOT: &'static str = "assembly";

    /// Creates the pipeline.
    #[must_use]
    pub fn new(services: Arc<PipelineServices>) -> Self {
        let root = PipelineNode::new(Self::ROOT)
            .with_options(NodeOptions::inherit().continue_on_failure(true))
            .with_child(LookupCheckpoint {
                services: Arc::clone(&services),
            })
            .with_child(QueryCatalog {
                services: Arc::clone(&services),
            })
            .with_child(ClaimCheckpoint {
                services: Arc::clone(&services),
            })
            .with_child(AllocateBatch {
                services: Arc::clone(&services),
            })
            .with_child(PersistJob {
                services: Arc::clone(&services),
            })
            .with_child(PersistBuild {
                services: Arc::clone(&services),
            })
            .with_child(DispatchRequest {
                services: Arc::clone(&services),
            });
        Self { services, root }
    }

    /// Assembles one request.
    ///
    /// A request whose job id already has a persisted Job is treated as a
    /// redelivery: nothing runs and the stored Job is projected.
    ///
    /// # Errors
    ///
    /// Returns an error if the redelivery check fails or a node fault
    /// propagates out of the tree. A propagated fault still leaves the Job
    /// persisted as `Failed`.
    pub async fn run(
        &self,
        request: AssemblyRequest,
        cancellation: &CancellationToken,
    ) -> Result<AssemblyOutcome, OrchestratorError> {
        if let Some(existing) = self
            .services
            .jobs
            .try_get(&request.job_id, Job::ROW_KEY)
            .await?
        {
            info!(
                job_id = %existing.id,
                state = %existing.state,
                "Job already assembled; skipping redelivered request"
            );
            return Ok(AssemblyOutcome {
                projection: JobProjection::from(&existing),
                status: NodeStatus::NotRun,
                result: NodeResult::not_run(Self::ROOT),
            });
        }

        let ctx = ExecutionContext::new(AssemblySubject::new(request.to_job()))
            .with_options(self.services.execution)
            .with_event_sink(Arc::clone(&self.services.event_sink))
            .with_cancellation(cancellation.clone())
            .with_run_label(request.job_id.clone());

        let result = match run_pipeline(&self.root, &ctx).await {
            Ok(result) => result,
            Err(fault) => {
                fail_and_record(&self.services, &ctx).await;
                error!(job_id = %request.job_id, error = %fault.error, "Assembly faulted; job state recorded");
                return Err(fault.into());
            }
        };
        let subject = ctx.into_subject();
        info!(
            job_id = %subject.job.id,
            data_standard = %subject.job.data_standard,
            state = %subject.job.state,
            batch_id = ?subject.job.batch_id,
            status = %result.status,
            "Assembly finished"
        );

        Ok(AssemblyOutcome {
            projection: JobProjection::from(&subject.job),
            status: result.status,
            result,
        })
    }
}

impl std::fmt::Debug for AssemblyPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssemblyPipeline")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}
