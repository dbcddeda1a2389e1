use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use super::error::{ApiError, ApiResult};
use super::state::AppState;
use crate::model::{BuildNodeStatus, BuildStatusRecord, ExchangeSetRequest, Job};

/// Attempts at an etag-checked status append before giving up.
const MAX_STATUS_RETRIES: usize = 5;

/// Body of an accepted submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// Identifier assigned to the job.
    pub job_id: String,
}

/// Body of a status report reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// False if the step was already recorded.
    pub appended: bool,
    /// Steps now on record.
    pub node_count: usize,
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub(super) async fn submit_job(
    State(state): State<AppState>,
    Json(request): Json<ExchangeSetRequest>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let data_standard = request.validate()?;
    let job_id = Uuid::now_v7().to_string();
    let correlation_id = request
        .correlation_id
        .clone()
        .filter(|c| !c.trim().is_empty())
        .unwrap_or_else(|| job_id.clone());

    let message = request.into_assembly(job_id.clone(), data_standard, correlation_id.clone());
    let body = serde_json::to_string(&message)?;
    state
        .services
        .queues
        .enqueue(&state.request_queue, body)
        .await?;

    info!(
        job_id = %job_id,
        correlation_id = %correlation_id,
        data_standard = %data_standard,
        "Exchange set job accepted"
    );
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse { job_id })))
}

pub(super) async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state.services.jobs.get(&id, Job::ROW_KEY).await?;
    Ok(Json(job))
}

pub(super) async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<BuildStatusRecord>> {
    let record = state
        .services
        .build_statuses
        .get(&id, BuildStatusRecord::ROW_KEY)
        .await?;
    Ok(Json(record))
}

pub(super) async fn report_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(status): Json<BuildNodeStatus>,
) -> ApiResult<(StatusCode, Json<StatusReport>)> {
    let table = &state.services.build_statuses;

    for attempt in 1..=MAX_STATUS_RETRIES {
        let mut record = table.get(&id, BuildStatusRecord::ROW_KEY).await?;
        if !record.append(status.clone()) {
            let report = StatusReport {
                appended: false,
                node_count: record.node_statuses.len(),
            };
            return Ok((StatusCode::OK, Json(report)));
        }

        match table.update(&record).await {
            Ok(stored) => {
                debug!(job_id = %id, node_id = %status.node_id, "Build step recorded");
                let report = StatusReport {
                    appended: true,
                    node_count: stored.node_statuses.len(),
                };
                return Ok((StatusCode::CREATED, Json(report)));
            }
            Err(err) if err.is_conflict() => {
                debug!(job_id = %id, attempt, "Status record changed underneath, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(ApiError::RetriesExhausted {
        key: id,
        attempts: MAX_STATUS_RETRIES,
    })
}
