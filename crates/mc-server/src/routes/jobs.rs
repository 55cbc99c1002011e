//! Job API route handlers.

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

use mc_core::{Error, JobId, JobStatus, MediaKind, NodeLocation};
use mc_db::models::Job;

use crate::context::AppContext;
use crate::error::AppError;
use crate::lifecycle::{self, Upload};

/// Query parameters for submitting an upload.
#[derive(Debug, Deserialize)]
pub struct SubmitParams {
    pub filename: String,
    pub target_format: String,
}

/// Query parameters for listing jobs.
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub expires_at: DateTime<Utc>,
}

/// Job status snapshot.
#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub id: JobId,
    pub original_filename: String,
    pub source_format: String,
    pub target_format: String,
    pub media_kind: MediaKind,
    pub status: JobStatus,
    pub progress: u8,
    pub location: NodeLocation,
    pub file_size: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub download_ready: bool,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            original_filename: job.original_filename.clone(),
            source_format: job.source_format.clone(),
            target_format: job.target_format.clone(),
            media_kind: job.media_kind,
            status: job.status,
            progress: job.progress,
            location: job.location,
            file_size: job.file_size,
            error_message: job.error_message.clone(),
            created_at: job.created_at,
            expires_at: job.expires_at,
            updated_at: job.updated_at,
            download_ready: job.status == JobStatus::Completed,
        }
    }
}

pub(crate) fn parse_job_id(id: &str) -> Result<JobId, AppError> {
    id.parse()
        .map_err(|_| Error::Validation(format!("Invalid job ID: {id}")).into())
}

/// POST /api/jobs?filename=&target_format=
pub async fn submit_job(
    State(ctx): State<AppContext>,
    Query(params): Query<SubmitParams>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let upload = Upload {
        filename: params.filename,
        target_format: params.target_format,
        data: body,
    };
    let job = tokio::task::spawn_blocking(move || lifecycle::submit(&ctx, upload, Utc::now()))
        .await
        .map_err(|e| Error::Internal(format!("spawn_blocking join error: {e}")))??;

    Ok((
        StatusCode::CREATED,
        Json(SubmitResponse {
            job_id: job.id,
            status: job.status,
            expires_at: job.expires_at,
        }),
    ))
}

/// POST /api/jobs/{id}/convert
pub async fn convert_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let job_id = parse_job_id(&id)?;
    // The conversion runs detached; clients poll the status route.
    let _handle = lifecycle::dispatch(&ctx, job_id, Utc::now())?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "job_id": job_id, "status": JobStatus::Processing })),
    ))
}

/// GET /api/jobs/{id}
pub async fn get_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    let job_id = parse_job_id(&id)?;
    let job = lifecycle::status(&ctx, job_id, Utc::now())?;
    Ok(Json(JobResponse::from(&job)))
}

/// GET /api/jobs?limit=
pub async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<Vec<JobResponse>>, AppError> {
    let limit = params.limit.clamp(1, 500);
    let jobs = lifecycle::list_recent(&ctx, limit)?;
    Ok(Json(jobs.iter().map(JobResponse::from).collect()))
}

/// GET /api/jobs/{id}/download
pub async fn download_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let job_id = parse_job_id(&id)?;
    let download = lifecycle::download(&ctx, job_id, Utc::now())?;

    let file = tokio::fs::File::open(&download.path)
        .await
        .map_err(|e| Error::storage_io(download.path.display().to_string(), e))?;
    let body = Body::from_stream(ReaderStream::new(file));

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", download.file_name),
            ),
        ],
        body,
    )
        .into_response())
}
