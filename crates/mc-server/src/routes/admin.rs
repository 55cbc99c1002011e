//! Administrative and reporting route handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;

use crate::cleanup::{self, StorageReport, SweepReport};
use crate::context::AppContext;
use crate::error::AppError;
use crate::lifecycle;
use crate::routes::jobs::parse_job_id;

/// GET /api/stats
pub async fn stats(State(ctx): State<AppContext>) -> Result<Json<StorageReport>, AppError> {
    Ok(Json(lifecycle::aggregate(&ctx, Utc::now())?))
}

/// DELETE /api/admin/jobs/{id}
pub async fn delete_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let job_id = parse_job_id(&id)?;
    lifecycle::force_delete(&ctx, job_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/admin/cleanup
pub async fn cleanup_now(State(ctx): State<AppContext>) -> Result<Json<SweepReport>, AppError> {
    tracing::info!("Manual cleanup requested");
    Ok(Json(cleanup::routine_sweep(&ctx, Utc::now()).await?))
}
