//! Expiry and cleanup engine.
//!
//! The routine and emergency sweeps and the single-job purges share one
//! purge sequence:
//!
//! 1. re-read the job and leave it alone if it became active since the
//!    sweep listed it,
//! 2. delete the source and converted artifacts, best effort (a missing
//!    file counts as deleted),
//! 3. delete the job record, conditionally on the same guard, whose outcome
//!    decides whether the job counts as cleaned,
//! 4. only after a successful record deletion, notify the peer (soft
//!    failure).
//!
//! Every sweep is idempotent: purged jobs no longer appear in the store
//! listings, so a re-run finds nothing to do. Errors are caught per job and
//! never abort a sweep.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use mc_core::events::{EventCategory, EventPayload, SweepKind};
use mc_core::{Error, JobId, JobStatus, Result};
use mc_db::models::{Job, JobAggregate};
use mc_db::pool::get_conn;
use mc_db::queries::jobs;

use crate::context::AppContext;

/// Outcome counts for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Jobs whose record was deleted.
    pub cleaned: u64,
    /// Jobs whose record could not be deleted.
    pub errors: u64,
    /// Jobs matched but deliberately left alone.
    pub skipped: u64,
}

/// Read-only snapshot of what the store holds.
#[derive(Debug, Clone, Serialize)]
pub struct StorageReport {
    #[serde(flatten)]
    pub totals: JobAggregate,
    /// Jobs past expiry that have not been purged yet, of any status.
    pub expired_count: i64,
    pub generated_at: DateTime<Utc>,
}

/// Whether to call the peer after a successful purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeerPolicy {
    Notify,
    Silent,
}

/// Which `processing` jobs a purge must leave alone.
///
/// The guard is checked against a fresh read of the job and again by the
/// record delete itself, so a job dispatched after a sweep listed it is not
/// purged from under its conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ActiveGuard {
    /// Purge whatever the status.
    Force,
    /// Keep every `processing` job.
    AnyProcessing,
    /// Keep `processing` jobs updated at or after the given instant.
    UpdatedSince(DateTime<Utc>),
}

impl ActiveGuard {
    fn protects(self, job: &Job) -> bool {
        job.status == JobStatus::Processing
            && match self {
                Self::Force => false,
                Self::AnyProcessing => true,
                Self::UpdatedSince(since) => job.updated_at >= since,
            }
    }
}

/// What a single purge did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PurgeOutcome {
    Purged,
    AlreadyGone,
    Active,
}

// ---------------------------------------------------------------------------
// Sweeps
// ---------------------------------------------------------------------------

/// Purge every job that expired before `now`, skipping `processing` jobs.
pub async fn routine_sweep(ctx: &AppContext, now: DateTime<Utc>) -> Result<SweepReport> {
    let expired = {
        let conn = get_conn(&ctx.db)?;
        jobs::list_expired(&conn, now)?
    };

    let mut report = SweepReport::default();
    for job in &expired {
        match purge(ctx, job.id, PeerPolicy::Notify, ActiveGuard::AnyProcessing).await {
            Ok(PurgeOutcome::Purged) => report.cleaned += 1,
            Ok(PurgeOutcome::AlreadyGone) => {}
            Ok(PurgeOutcome::Active) => {
                tracing::info!(job_id = %job.id, "Cleanup skipping job that started converting");
                report.skipped += 1;
            }
            Err(e) => {
                report.errors += 1;
                tracing::error!(job_id = %job.id, error = %e, "Failed to clean up job");
            }
        }
    }

    tracing::info!(
        found = expired.len(),
        cleaned = report.cleaned,
        skipped = report.skipped,
        errors = report.errors,
        "Cleanup completed"
    );
    finish(ctx, SweepKind::Routine, report);
    Ok(report)
}

/// Purge every job created more than `cleanup.emergency_max_age_hours`
/// before `now`, whatever its status.
///
/// A `processing` job is only purged once it has gone
/// `cleanup.emergency_min_idle_secs` without a store update; a conversion
/// that is still making progress is skipped.
pub async fn emergency_sweep(ctx: &AppContext, now: DateTime<Utc>) -> Result<SweepReport> {
    let cleanup = &ctx.config.cleanup;
    let cutoff = now
        .checked_sub_signed(cleanup.emergency_max_age()?)
        .ok_or_else(|| Error::Validation("emergency cutoff out of range".into()))?;
    let active_since = now
        .checked_sub_signed(cleanup.emergency_min_idle()?)
        .ok_or_else(|| Error::Validation("emergency idle cutoff out of range".into()))?;

    let old = {
        let conn = get_conn(&ctx.db)?;
        jobs::list_older_than(&conn, cutoff)?
    };

    if old.is_empty() {
        tracing::info!("Emergency cleanup found no stale jobs");
    }

    let mut report = SweepReport::default();
    for job in &old {
        let guard = ActiveGuard::UpdatedSince(active_since);
        match purge(ctx, job.id, PeerPolicy::Notify, guard).await {
            Ok(PurgeOutcome::Purged) => {
                tracing::warn!(
                    job_id = %job.id,
                    status = %job.status,
                    created_at = %job.created_at,
                    "Emergency cleanup purged stale job"
                );
                report.cleaned += 1;
            }
            Ok(PurgeOutcome::AlreadyGone) => {}
            Ok(PurgeOutcome::Active) => {
                tracing::info!(job_id = %job.id, "Emergency cleanup skipping active conversion");
                report.skipped += 1;
            }
            Err(e) => {
                report.errors += 1;
                tracing::error!(job_id = %job.id, error = %e, "Emergency cleanup failed for job");
            }
        }
    }

    if !old.is_empty() {
        tracing::warn!(
            cleaned = report.cleaned,
            skipped = report.skipped,
            errors = report.errors,
            "Emergency cleanup completed"
        );
    }
    finish(ctx, SweepKind::Emergency, report);
    Ok(report)
}

/// Aggregate totals plus the count of expired-but-unpurged jobs. Never
/// mutates the store.
pub fn storage_report(ctx: &AppContext, now: DateTime<Utc>) -> Result<StorageReport> {
    let conn = get_conn(&ctx.db)?;
    let totals = jobs::aggregate(&conn)?;
    let expired_count = jobs::count_expired(&conn, now)?;

    tracing::info!(
        total_files = totals.total_files,
        total_size_mb = totals.total_size as f64 / (1024.0 * 1024.0),
        expired = expired_count,
        "Storage report"
    );
    for (status, bucket) in &totals.status_breakdown {
        tracing::info!(
            status = %status,
            count = bucket.count,
            size = bucket.total_size,
            "Storage by status"
        );
    }

    Ok(StorageReport {
        totals,
        expired_count,
        generated_at: now,
    })
}

// ---------------------------------------------------------------------------
// Single-job purges
// ---------------------------------------------------------------------------

/// Purge one job on request of the peer node, without notifying back.
///
/// Unknown ids succeed with `false`, so the peer may retry freely.
pub async fn purge_local(ctx: &AppContext, job_id: JobId) -> Result<bool> {
    match purge(ctx, job_id, PeerPolicy::Silent, ActiveGuard::Force).await? {
        PurgeOutcome::Purged => Ok(true),
        _ => {
            tracing::debug!(job_id = %job_id, "Peer cleanup for unknown job");
            Ok(false)
        }
    }
}

/// Run the purge sequence for one job.
///
/// The job is re-read first; `guard` decides against that fresh copy and is
/// repeated by the record delete. Only a store failure is an error.
pub(crate) async fn purge(
    ctx: &AppContext,
    job_id: JobId,
    peer: PeerPolicy,
    guard: ActiveGuard,
) -> Result<PurgeOutcome> {
    let job = {
        let conn = get_conn(&ctx.db)?;
        jobs::find_job(&conn, job_id)?
    };
    let Some(job) = job else {
        tracing::debug!(job_id = %job_id, "Job record already removed");
        return Ok(PurgeOutcome::AlreadyGone);
    };
    if guard.protects(&job) {
        return Ok(PurgeOutcome::Active);
    }

    for path in [&job.source_path, &job.converted_path].into_iter().flatten() {
        if let Err(e) = remove_artifact(Path::new(path)) {
            tracing::warn!(job_id = %job.id, error = %e, "Artifact deletion failed; continuing");
        }
    }

    let deleted = {
        let conn = get_conn(&ctx.db)?;
        let deleted = match guard {
            ActiveGuard::Force => jobs::delete_job(&conn, job.id)?,
            ActiveGuard::AnyProcessing => jobs::delete_unless_active(&conn, job.id, None)?,
            ActiveGuard::UpdatedSince(since) => {
                jobs::delete_unless_active(&conn, job.id, Some(since))?
            }
        };
        if !deleted && jobs::find_job(&conn, job.id)?.is_some() {
            tracing::warn!(job_id = %job.id, "Job was dispatched while being purged; record kept");
            return Ok(PurgeOutcome::Active);
        }
        deleted
    };
    if !deleted {
        tracing::debug!(job_id = %job.id, "Job record already removed");
        return Ok(PurgeOutcome::AlreadyGone);
    }

    tracing::info!(job_id = %job.id, "Cleaned up job");
    ctx.event_bus
        .broadcast(EventCategory::Admin, EventPayload::JobPurged { job_id: job.id });

    if peer == PeerPolicy::Notify {
        if let Err(e) = ctx.peer.notify(job.id, job.location).await {
            tracing::warn!(
                job_id = %job.id,
                location = %job.location,
                error = %e,
                "Peer notification failed; local cleanup stands"
            );
        }
    }

    Ok(PurgeOutcome::Purged)
}

/// Delete one artifact. A file that is already gone is not an error.
pub fn remove_artifact(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Deleted artifact");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::storage_io(path.display().to_string(), e)),
    }
}

fn finish(ctx: &AppContext, kind: SweepKind, report: SweepReport) {
    ctx.event_bus.broadcast(
        EventCategory::Admin,
        EventPayload::SweepFinished {
            kind,
            cleaned: report.cleaned,
            errors: report.errors,
        },
    );
}
