//! Submission job endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use podpush_core::{JobState, LogMessage, ResourceId, SubmissionJob};
use podpush_db::JobStore;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

pub fn router<S>() -> Router<AppState<S>>
where
    S: JobStore + Clone + 'static,
{
    Router::new()
        .route("/", get(list_jobs::<S>).post(create_job::<S>))
        .route("/{id}", get(get_job::<S>))
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub pod_version_id: uuid::Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

/// A job with its derived state and log trail.
#[derive(Debug, Serialize)]
pub struct JobDetail {
    pub job: SubmissionJob,
    pub state: JobState,
    pub logs: Vec<LogMessage>,
}

async fn create_job<S>(
    State(state): State<AppState<S>>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<SubmissionJob>), ApiError>
where
    S: JobStore + Clone + 'static,
{
    let version = state
        .registry
        .pod_version(ResourceId::from_uuid(req.pod_version_id))
        .await?;
    if version.published {
        return Err(ApiError::Conflict(format!(
            "{} {} is already published",
            version.pod_name, version.version
        )));
    }

    let job = state.store.create(version.id).await?;
    info!(job_id = %job.id, pod = %version.pod_name, version = %version.version, "Submitted job");
    Ok((StatusCode::CREATED, Json(job)))
}

async fn list_jobs<S>(
    State(state): State<AppState<S>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<SubmissionJob>>, ApiError>
where
    S: JobStore + Clone + 'static,
{
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    Ok(Json(state.store.list(limit).await?))
}

async fn get_job<S>(
    State(state): State<AppState<S>>,
    Path(id): Path<uuid::Uuid>,
) -> Result<Json<JobDetail>, ApiError>
where
    S: JobStore + Clone + 'static,
{
    let id = ResourceId::from_uuid(id);
    let job = state.store.get(id).await?;
    let logs = state.store.logs(id).await?;
    Ok(Json(JobDetail {
        state: job.state(),
        job,
        logs,
    }))
}
