//! Job lifecycle operations exposed to the HTTP layer.
//!
//! Submission validates and stores the upload, dispatch hands the job to the
//! executor, and status reads go straight through to the store but report
//! [`Error::Expired`] once a job is past its expiry instead of its data.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use mc_core::events::{EventCategory, EventPayload};
use mc_core::{Error, JobId, JobStatus, Result};
use mc_db::models::{Job, NewJob};
use mc_db::pool::get_conn;
use mc_db::queries::jobs;

use crate::cleanup::{self, ActiveGuard, PeerPolicy, StorageReport};
use crate::context::AppContext;
use crate::executor;

/// An uploaded file waiting to become a job.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub target_format: String,
    pub data: Bytes,
}

/// A converted artifact ready to be served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub path: PathBuf,
    /// Suggested client-side name: `<original stem>.<target>`.
    pub file_name: String,
}

/// Reduce an uploaded file name to a safe single path component.
///
/// Keeps ASCII alphanumerics, `.`, `-` and `_`; whitespace becomes `_`;
/// anything before the last path separator is dropped, as are leading dots
/// and underscores.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') => Some(c),
            c if c.is_whitespace() => Some('_'),
            _ => None,
        })
        .collect();
    cleaned.trim_start_matches(['.', '_']).to_string()
}

fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(|e| e.to_ascii_lowercase())
}

/// Validate, persist and register an upload as a new `pending` job.
///
/// The source is written to `original_dir/{id}_{filename}`; if the record
/// cannot be created the file is removed again. Performs blocking file and
/// database I/O, so async callers run it on the blocking pool.
pub fn submit(ctx: &AppContext, upload: Upload, now: DateTime<Utc>) -> Result<Job> {
    let config = &ctx.config;

    let filename = sanitize_filename(&upload.filename);
    if filename.is_empty() {
        return Err(Error::Validation("no file selected".into()));
    }
    let source_format = extension(&filename)
        .ok_or_else(|| Error::Validation(format!("file {filename} has no extension")))?;
    let media_kind = config
        .formats
        .media_kind(&source_format)
        .ok_or_else(|| Error::Validation(format!("unsupported file format: {source_format}")))?;

    let target_format = upload.target_format.trim().to_ascii_lowercase();
    if !config.formats.is_allowed(&target_format) {
        return Err(Error::Validation(format!(
            "unsupported target format: {target_format}"
        )));
    }

    if upload.data.is_empty() {
        return Err(Error::Validation("uploaded file is empty".into()));
    }
    if upload.data.len() as u64 > config.storage.max_upload_bytes {
        return Err(Error::Validation(format!(
            "file exceeds the {} byte upload limit",
            config.storage.max_upload_bytes
        )));
    }

    let id = JobId::new();
    let original_dir = &config.storage.original_dir;
    let source_path = original_dir.join(format!("{id}_{filename}"));
    let job = NewJob {
        id,
        original_filename: filename,
        source_format,
        target_format,
        media_kind,
        location: config.node.artifact_location(),
        source_path: Some(source_path.to_string_lossy().to_string()),
        file_size: upload.data.len() as i64,
    }
    .into_job(now, config.retention.window()?)?;

    std::fs::create_dir_all(original_dir)
        .map_err(|e| Error::storage_io(original_dir.display().to_string(), e))?;
    std::fs::write(&source_path, &upload.data)
        .map_err(|e| Error::storage_io(source_path.display().to_string(), e))?;

    let created = get_conn(&ctx.db).and_then(|conn| jobs::create_job(&conn, &job));
    if let Err(e) = created {
        if let Err(rm) = cleanup::remove_artifact(&source_path) {
            tracing::warn!(job_id = %id, error = %rm, "Failed to remove orphaned upload");
        }
        return Err(e);
    }

    tracing::info!(
        job_id = %id,
        file = %job.original_filename,
        kind = %job.media_kind,
        target = %job.target_format,
        size = job.file_size,
        "Job submitted"
    );
    ctx.event_bus
        .broadcast(EventCategory::User, EventPayload::JobSubmitted { job_id: id });

    Ok(job)
}

/// Start converting a `pending`, unexpired job.
pub fn dispatch(ctx: &AppContext, job_id: JobId, now: DateTime<Utc>) -> Result<JoinHandle<()>> {
    status(ctx, job_id, now)?;
    executor::dispatch(ctx, job_id)
}

/// Current snapshot of a job, or [`Error::Expired`] once `now` is past its
/// expiry.
pub fn status(ctx: &AppContext, job_id: JobId, now: DateTime<Utc>) -> Result<Job> {
    let conn = get_conn(&ctx.db)?;
    let job = jobs::get_job(&conn, job_id)?;
    if job.is_expired_at(now) {
        return Err(Error::Expired(job_id.to_string()));
    }
    Ok(job)
}

/// Locate the converted artifact of a completed job.
pub fn download(ctx: &AppContext, job_id: JobId, now: DateTime<Utc>) -> Result<Download> {
    let job = status(ctx, job_id, now)?;
    if job.status != JobStatus::Completed {
        return Err(Error::Validation("file not ready".into()));
    }

    let path = job
        .converted_path
        .as_deref()
        .map(PathBuf::from)
        .filter(|p| p.exists())
        .ok_or_else(|| Error::not_found("converted file", job_id))?;

    let stem = Path::new(&job.original_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("converted");

    Ok(Download {
        path,
        file_name: format!("{stem}.{}", job.target_format),
    })
}

/// Administrative deletion: purge artifacts and record, then notify the peer.
pub async fn force_delete(ctx: &AppContext, job_id: JobId) -> Result<()> {
    {
        let conn = get_conn(&ctx.db)?;
        jobs::get_job(&conn, job_id)?;
    }
    tracing::info!(job_id = %job_id, "Administrative delete");
    cleanup::purge(ctx, job_id, PeerPolicy::Notify, ActiveGuard::Force).await?;
    Ok(())
}

/// Most recently submitted jobs, newest first.
pub fn list_recent(ctx: &AppContext, limit: i64) -> Result<Vec<Job>> {
    let conn = get_conn(&ctx.db)?;
    jobs::list_recent(&conn, limit)
}

/// Store-wide totals for dashboards.
pub fn aggregate(ctx: &AppContext, now: DateTime<Utc>) -> Result<StorageReport> {
    cleanup::storage_report(ctx, now)
}
