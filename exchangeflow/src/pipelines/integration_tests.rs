//! Assembly and completion run back to back against one environment, with
//! a scripted worker in between.

use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;

use super::{AssemblyPipeline, CompletionPipeline};
use crate::cancellation::CancellationToken;
use crate::collaborators::{
    download_json, upload_json, BatchState, CatalogChanges, QueueClient, TableStore,
};
use crate::core::NodeStatus;
use crate::model::{
    summary_blob_key, AssemblyRequest, Build, BuildLogLine, BuildNodeStatus, BuildRequest,
    BuildResponse, BuildState, BuildStatusRecord, DataStandard, Job, JobState, LogLevel,
    WorkerExitCode,
};
use crate::testing::InMemoryEnvironment;

fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn request(job_id: &str, standard: DataStandard) -> AssemblyRequest {
    AssemblyRequest {
        job_id: job_id.to_string(),
        data_standard: standard,
        products: vec![],
        filter: None,
        correlation_id: "corr".to_string(),
    }
}

/// Plays a builder worker: takes one request off `queue`, fills in the
/// build and uploads the summary.
async fn work(env: &InMemoryEnvironment, queue: &str, exit_code: WorkerExitCode) -> BuildResponse {
    let messages = env.queues.receive(queue, 1).await.unwrap();
    let request: BuildRequest = serde_json::from_str(&messages[0].body).unwrap();
    env.queues.delete(queue, &messages[0]).await.unwrap();

    let mut build: Build = download_json(env.blobs.as_ref(), &request.workspace_key)
        .await
        .unwrap();
    build.state = if exit_code.is_success() {
        BuildState::Succeeded
    } else {
        BuildState::Failed
    };
    build.node_statuses = vec![BuildNodeStatus::new("build", NodeStatus::Succeeded, ts(100))];
    build.log_lines = vec![BuildLogLine {
        timestamp: ts(100),
        level: LogLevel::Information,
        message: "built".to_string(),
    }];
    upload_json(env.blobs.as_ref(), &summary_blob_key(&request.job_id), &build)
        .await
        .unwrap();

    BuildResponse {
        job_id: request.job_id,
        batch_id: Some(request.batch_id),
        data_standard: Some(request.data_standard),
        exit_code,
    }
}

#[tokio::test]
async fn test_job_round_trip_success_then_up_to_date() {
    let env = InMemoryEnvironment::new();
    let services = Arc::new(env.services());
    services.ensure_storage().await.unwrap();
    let assembly = AssemblyPipeline::new(Arc::clone(&services));
    let completion = CompletionPipeline::new(Arc::clone(&services));
    let cancel = CancellationToken::new();

    env.catalog
        .push(Ok(CatalogChanges::changed(vec!["GB1".to_string()], ts(40))));
    let assembled = assembly
        .run(request("job-1", DataStandard::S63), &cancel)
        .await
        .unwrap();
    assert_eq!(assembled.projection.state, JobState::InProgress);

    let response = work(&env, "s63-build-requests", WorkerExitCode::Success).await;
    let completed = completion.run(response, &cancel).await.unwrap();
    assert_eq!(completed.state, Some(JobState::Succeeded));

    let batch_id = assembled.projection.batch_id.unwrap();
    assert_eq!(env.file_store.state(&batch_id), Some(BatchState::Committed));

    // The next job sees the advanced checkpoint and the catalog has
    // nothing newer.
    let again = assembly
        .run(request("job-2", DataStandard::S63), &cancel)
        .await
        .unwrap();
    assert_eq!(again.projection.state, JobState::UpToDate);
    let queries = env.catalog.queries();
    assert_eq!(queries[1].since, Some(ts(40)));
}

#[tokio::test]
async fn test_failed_build_allows_retry_of_same_snapshot() {
    let env = InMemoryEnvironment::new();
    let services = Arc::new(env.services());
    services.ensure_storage().await.unwrap();
    let assembly = AssemblyPipeline::new(Arc::clone(&services));
    let completion = CompletionPipeline::new(Arc::clone(&services));
    let cancel = CancellationToken::new();

    env.catalog.push(Ok(CatalogChanges::changed(vec![], ts(40))));
    let first = assembly
        .run(request("job-1", DataStandard::S100), &cancel)
        .await
        .unwrap();

    // While job-1 is in flight, the same snapshot is a duplicate.
    env.catalog.push(Ok(CatalogChanges::changed(vec![], ts(40))));
    let duplicate = assembly
        .run(request("job-2", DataStandard::S100), &cancel)
        .await
        .unwrap();
    assert_eq!(duplicate.projection.state, JobState::Duplicate);

    let response = work(&env, "s100-build-requests", WorkerExitCode::Failed).await;
    let completed = completion.run(response, &cancel).await.unwrap();
    assert_eq!(completed.state, Some(JobState::Failed));
    let batch_id = first.projection.batch_id.unwrap();
    assert_eq!(env.file_store.state(&batch_id), Some(BatchState::Open));

    // A new submission rebuilds the snapshot.
    env.catalog.push(Ok(CatalogChanges::changed(vec![], ts(40))));
    let retry = assembly
        .run(request("job-3", DataStandard::S100), &cancel)
        .await
        .unwrap();
    assert_eq!(retry.projection.state, JobState::InProgress);
    assert_eq!(
        env.catalog.queries()[2].since,
        None,
        "a failed build must not advance the checkpoint"
    );
}

#[tokio::test]
async fn test_status_record_keeps_assembly_and_worker_entries_distinct() {
    let env = InMemoryEnvironment::new();
    let services = Arc::new(env.services());
    services.ensure_storage().await.unwrap();
    let cancel = CancellationToken::new();

    env.catalog.push(Ok(CatalogChanges::changed(vec![], ts(1))));
    AssemblyPipeline::new(Arc::clone(&services))
        .run(request("job-1", DataStandard::S57), &cancel)
        .await
        .unwrap();

    // A worker reports a step directly before it finishes.
    let mut record = env
        .build_statuses
        .get("job-1", BuildStatusRecord::ROW_KEY)
        .await
        .unwrap();
    record.append(BuildNodeStatus::new("download", NodeStatus::Succeeded, ts(90)));
    env.build_statuses.update(&record).await.unwrap();

    let response = work(&env, "s57-build-requests", WorkerExitCode::Success).await;
    CompletionPipeline::new(services)
        .run(response, &cancel)
        .await
        .unwrap();

    let record = env
        .build_statuses
        .get("job-1", BuildStatusRecord::ROW_KEY)
        .await
        .unwrap();
    let nodes: Vec<&str> = record.node_statuses.iter().map(|s| s.node_id.as_str()).collect();
    assert_eq!(nodes, vec!["download", "build"]);
    assert_eq!(
        env.jobs.get("job-1", Job::ROW_KEY).await.unwrap().state,
        JobState::Succeeded
    );
}
