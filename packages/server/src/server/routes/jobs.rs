//! Job runner and job state routes.

use axum::{
    extract::{rejection::JsonRejection, Extension, Path, Query},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kernel::jobs::{ActiveJobQuery, Job};
use crate::server::app::AxumAppState;
use crate::server::error::ApiError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJobRequest {
    pub job_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct RunJobResponse {
    pub message: String,
}

/// `POST /api/jobs/run`
///
/// Called by the queue consumer with the message body of a fanned-out job.
/// Fields other than `jobId` are ignored.
pub async fn run_job_handler(
    Extension(state): Extension<AxumAppState>,
    payload: Result<Json<RunJobRequest>, JsonRejection>,
) -> Result<Json<RunJobResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let job_id = request
        .job_id
        .ok_or_else(|| ApiError::BadRequest("jobId is required".to_string()))?;

    let outcome = state.deps.runner().run_job(job_id).await?;

    Ok(Json(RunJobResponse {
        message: outcome.message(),
    }))
}

/// `GET /api/jobs/active` - most recent live job in scope, or `null`.
pub async fn active_job_handler(
    Extension(state): Extension<AxumAppState>,
    Query(query): Query<ActiveJobQuery>,
) -> Result<Json<Option<Job>>, ApiError> {
    let jobs = state.deps.store.find_active(&query).await?;
    Ok(Json(jobs.into_iter().next()))
}

/// `GET /api/jobs/{id}`
pub async fn get_job_handler(
    Extension(state): Extension<AxumAppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    state
        .deps
        .store
        .find_by_id(job_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))
}
