//! Endpoint the cooperating node calls after purging a job on its side.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::{json, Value};

use crate::cleanup;
use crate::context::AppContext;
use crate::error::AppError;
use crate::routes::jobs::parse_job_id;

/// DELETE /api/cleanup/{id}
///
/// Purges the job locally without notifying back. Unknown ids succeed.
pub async fn cleanup_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let job_id = parse_job_id(&id)?;
    let removed = cleanup::purge_local(&ctx, job_id).await?;
    tracing::info!(job_id = %job_id, removed, "Peer cleanup request handled");
    Ok(Json(json!({ "status": "success", "removed": removed })))
}
