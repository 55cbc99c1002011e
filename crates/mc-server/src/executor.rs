//! Background conversion executor.
//!
//! [`dispatch`] claims a `pending` job synchronously (so a second dispatch
//! fails fast with `AlreadyProcessing`) and then runs the conversion on its
//! own task. The store is the only state shared with the caller.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::task::JoinHandle;

use mc_core::events::{EventCategory, EventPayload};
use mc_core::{Error, JobId, JobStatus, Result, TranscodeFailure};
use mc_db::models::Job;
use mc_db::pool::get_conn;
use mc_db::queries::jobs;

use crate::context::AppContext;

/// Progress written when a job is claimed.
pub const PROGRESS_STARTED: u8 = 10;
/// Progress written just before the transcoder runs.
pub const PROGRESS_TRANSCODING: u8 = 50;

/// Message stored on jobs found in `processing` at startup.
pub const INTERRUPTED_MESSAGE: &str = "interrupted by restart";

/// Where the converted artifact for a job is written.
pub fn output_path(ctx: &AppContext, job: &Job) -> PathBuf {
    ctx.config
        .storage
        .converted_dir
        .join(format!("{}_converted.{}", job.id, job.target_format))
}

/// Claim `job_id` and spawn its conversion.
///
/// Fails with [`Error::AlreadyProcessing`] if the job is not `pending`, in
/// which case no work is started. The returned handle resolves once the job
/// has reached a terminal state.
pub fn dispatch(ctx: &AppContext, job_id: JobId) -> Result<JoinHandle<()>> {
    let conn = get_conn(&ctx.db)?;
    let job = jobs::claim_pending(&conn, job_id, PROGRESS_STARTED, Utc::now())?;
    drop(conn);

    tracing::info!(
        job_id = %job_id,
        source = %job.source_format,
        target = %job.target_format,
        "Conversion started"
    );
    ctx.event_bus
        .broadcast(EventCategory::User, EventPayload::JobStarted { job_id });
    ctx.event_bus.broadcast(
        EventCategory::User,
        EventPayload::JobProgress {
            job_id,
            progress: PROGRESS_STARTED,
        },
    );

    let ctx = ctx.clone();
    Ok(tokio::spawn(supervise(ctx, job)))
}

/// Run the conversion on an inner task and make sure the job ends terminal
/// whether that task returns an error or panics.
async fn supervise(ctx: AppContext, job: Job) {
    let job_id = job.id;
    let output = output_path(&ctx, &job);

    let inner_ctx = ctx.clone();
    let inner_output = output.clone();
    let outcome = tokio::spawn(async move { convert(&inner_ctx, &job, &inner_output).await }).await;

    let result = match outcome {
        Ok(result) => result,
        Err(e) => Err(Error::Internal(format!("conversion task aborted: {e}"))),
    };

    match result {
        Ok(()) => {
            tracing::info!(job_id = %job_id, output = %output.display(), "Conversion completed");
            ctx.event_bus
                .broadcast(EventCategory::User, EventPayload::JobCompleted { job_id });
        }
        Err(e) => fail_job(&ctx, job_id, &output, &e),
    }
}

async fn convert(ctx: &AppContext, job: &Job, output: &Path) -> Result<()> {
    let source = job
        .source_path
        .as_deref()
        .map(PathBuf::from)
        .ok_or_else(|| Error::Validation(format!("job {} has no source file", job.id)))?;

    let converted_dir = &ctx.config.storage.converted_dir;
    std::fs::create_dir_all(converted_dir)
        .map_err(|e| Error::storage_io(converted_dir.display().to_string(), e))?;

    {
        let conn = get_conn(&ctx.db)?;
        jobs::update_job(&conn, job.id, Utc::now(), |j| {
            j.progress = PROGRESS_TRANSCODING
        })?;
    }
    ctx.event_bus.broadcast(
        EventCategory::User,
        EventPayload::JobProgress {
            job_id: job.id,
            progress: PROGRESS_TRANSCODING,
        },
    );

    ctx.transcoder.transcode(&source, output).await?;

    if !output.exists() {
        return Err(TranscodeFailure::Other(
            "transcoder reported success but produced no output".into(),
        )
        .into());
    }

    let converted = output.to_string_lossy().to_string();
    let conn = get_conn(&ctx.db)?;
    jobs::update_job(&conn, job.id, Utc::now(), |j| {
        j.status = JobStatus::Completed;
        j.progress = 100;
        j.converted_path = Some(converted);
    })?;

    Ok(())
}

/// Remove any partial output and move the job to `failed`.
///
/// Re-reads the job from the store, so this also covers errors raised after
/// an earlier status write. Jobs already terminal or already purged are left
/// alone.
fn fail_job(ctx: &AppContext, job_id: JobId, output: &Path, err: &Error) {
    let message = match err {
        Error::Transcode(failure) => failure.to_string(),
        other => other.to_string(),
    };
    tracing::error!(job_id = %job_id, error = %message, "Conversion failed");

    match std::fs::remove_file(output) {
        Ok(()) => tracing::debug!(job_id = %job_id, "Removed partial output"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            job_id = %job_id,
            path = %output.display(),
            error = %e,
            "Failed to remove partial output"
        ),
    }

    let update = get_conn(&ctx.db).and_then(|conn| {
        jobs::update_job(&conn, job_id, Utc::now(), |j| {
            if !j.status.is_terminal() {
                j.status = JobStatus::Failed;
                j.error_message = Some(message.clone());
            }
        })
    });

    match update {
        Ok(job) if job.status == JobStatus::Failed => {
            ctx.event_bus.broadcast(
                EventCategory::User,
                EventPayload::JobFailed {
                    job_id,
                    error: message,
                },
            );
        }
        Ok(job) => tracing::warn!(
            job_id = %job_id,
            status = %job.status,
            "Job already terminal; failure not recorded"
        ),
        Err(e) => tracing::error!(job_id = %job_id, error = %e, "Failed to mark job failed"),
    }
}

/// Fail every job a previous process left in `processing`.
///
/// Conversions do not survive a restart, so these jobs would otherwise sit
/// in `processing` until the emergency sweep reclaims them.
pub fn recover_interrupted(ctx: &AppContext) -> Result<usize> {
    let conn = get_conn(&ctx.db)?;
    let count = jobs::fail_stale_processing(&conn, INTERRUPTED_MESSAGE, Utc::now())?;
    if count > 0 {
        tracing::warn!(count, "Marked interrupted conversions as failed");
    }
    Ok(count)
}
