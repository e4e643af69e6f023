use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::error;

use crate::kernel::jobs::JobType;
use crate::kernel::{run_cron_tick, CronReport, TickStatus};
use crate::server::app::AxumAppState;
use crate::server::error::ApiError;

/// `GET /api/cron/{job-type}` - run one tick for a job type.
///
/// 200 when every candidate was enqueued, 207 when any item failed, 500 only
/// when selection failed before per-item work started.
pub async fn cron_handler(
    Extension(state): Extension<AxumAppState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let job_type = JobType::from_slug(&slug)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown job type: {}", slug)))?;

    let report = match run_cron_tick(&state.deps, job_type).await {
        Ok(report) => report,
        Err(e) => {
            error!(job_type = %job_type, error = %e, "cron tick failed");
            let body = json!({
                "success": false,
                "timestamp": Utc::now(),
                "error": format!("{:#}", e),
            });
            return Ok((StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response());
        }
    };

    let report = CronReport::new(&report);
    let status = match report.status() {
        TickStatus::Complete => StatusCode::OK,
        TickStatus::Partial => StatusCode::MULTI_STATUS,
    };

    Ok((status, Json(report)).into_response())
}
