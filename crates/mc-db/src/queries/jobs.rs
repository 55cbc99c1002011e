//! Conversion job store operations.
//!
//! Every mutation goes through one statement or one immediate transaction,
//! so concurrent writers to the same job serialize at the database and a
//! reader never observes a half-applied update.

use chrono::{DateTime, SubsecRound, Utc};
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use mc_core::{Error, JobId, JobStatus, Result};

use crate::models::{format_ts, Job, JobAggregate, StatusTotals};

pub(crate) const COLS: &str = "id, original_filename, source_format, target_format, media_kind,
    status, progress, location, source_path, converted_path, file_size, error_message,
    created_at, expires_at, updated_at";

fn collect_jobs(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Job>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map(params, Job::from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Persist a new job record.
///
/// Fails with [`Error::DuplicateId`] if a job with the same id exists.
pub fn create_job(conn: &Connection, job: &Job) -> Result<()> {
    job.check_invariants()?;

    let result = conn.execute(
        &format!(
            "INSERT INTO conversion_jobs ({COLS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
        ),
        rusqlite::params![
            job.id.to_string(),
            job.original_filename,
            job.source_format,
            job.target_format,
            job.media_kind.as_str(),
            job.status.as_str(),
            job.progress,
            job.location.as_str(),
            job.source_path,
            job.converted_path,
            job.file_size,
            job.error_message,
            format_ts(&job.created_at),
            format_ts(&job.expires_at),
            format_ts(&job.updated_at),
        ],
    );

    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            Err(Error::DuplicateId(job.id.to_string()))
        }
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Look up a job, returning `None` when it does not exist.
pub fn find_job(conn: &Connection, id: JobId) -> Result<Option<Job>> {
    let q = format!("SELECT {COLS} FROM conversion_jobs WHERE id = ?1");
    match conn.query_row(&q, [id.to_string()], Job::from_row) {
        Ok(job) => Ok(Some(job)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Fetch a job, failing with [`Error::NotFound`] when it does not exist.
pub fn get_job(conn: &Connection, id: JobId) -> Result<Job> {
    find_job(conn, id)?.ok_or_else(|| Error::not_found("job", id))
}

/// Atomically read, modify and write back a job.
///
/// `mutate` receives the current record. The result is rejected if it
/// changes the identity or timestamps fixed at creation, takes an illegal
/// status step, moves progress backwards (except when failing), or breaks
/// a record invariant. `updated_at` is set to `now` on success.
pub fn update_job<F>(conn: &Connection, id: JobId, now: DateTime<Utc>, mutate: F) -> Result<Job>
where
    F: FnOnce(&mut Job),
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|e| Error::database(e.to_string()))?;

    let before = get_job(&tx, id)?;
    let mut job = before.clone();
    mutate(&mut job);

    if job.id != before.id
        || job.created_at != before.created_at
        || job.expires_at != before.expires_at
    {
        return Err(Error::Validation(format!(
            "job {id}: identity and creation timestamps are immutable"
        )));
    }
    if !before.status.can_transition_to(job.status) {
        return Err(Error::Validation(format!(
            "job {id}: illegal transition {} -> {}",
            before.status, job.status
        )));
    }
    if job.status != JobStatus::Failed && job.progress < before.progress {
        return Err(Error::Validation(format!(
            "job {id}: progress may not decrease ({} -> {})",
            before.progress, job.progress
        )));
    }
    job.check_invariants()?;
    job.updated_at = now.trunc_subsecs(6);

    tx.execute(
        "UPDATE conversion_jobs SET original_filename=?2, source_format=?3, target_format=?4,
             media_kind=?5, status=?6, progress=?7, location=?8, source_path=?9,
             converted_path=?10, file_size=?11, error_message=?12, updated_at=?13
         WHERE id=?1",
        rusqlite::params![
            id.to_string(),
            job.original_filename,
            job.source_format,
            job.target_format,
            job.media_kind.as_str(),
            job.status.as_str(),
            job.progress,
            job.location.as_str(),
            job.source_path,
            job.converted_path,
            job.file_size,
            job.error_message,
            format_ts(&job.updated_at),
        ],
    )
    .map_err(|e| Error::database(e.to_string()))?;

    tx.commit().map_err(|e| Error::database(e.to_string()))?;
    Ok(job)
}

/// Atomically move a `pending` job to `processing` with the given progress.
///
/// Exactly one of any number of concurrent callers wins; the rest get
/// [`Error::AlreadyProcessing`]. A missing job yields [`Error::NotFound`].
pub fn claim_pending(
    conn: &Connection,
    id: JobId,
    progress: u8,
    now: DateTime<Utc>,
) -> Result<Job> {
    let q = format!(
        "UPDATE conversion_jobs SET status='processing', progress=?2, updated_at=?3
         WHERE id=?1 AND status='pending'
         RETURNING {COLS}"
    );

    match conn.query_row(
        &q,
        rusqlite::params![id.to_string(), progress, format_ts(&now)],
        Job::from_row,
    ) {
        Ok(job) => Ok(job),
        Err(rusqlite::Error::QueryReturnedNoRows) => match find_job(conn, id)? {
            Some(_) => Err(Error::AlreadyProcessing(id.to_string())),
            None => Err(Error::not_found("job", id)),
        },
        Err(e) => Err(Error::database(e.to_string())),
    }
}

/// Jobs whose expiry lies strictly before `now`, excluding `processing`
/// jobs, oldest first.
pub fn list_expired(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<Job>> {
    collect_jobs(
        conn,
        &format!(
            "SELECT {COLS} FROM conversion_jobs
             WHERE expires_at < ?1 AND status != 'processing'
             ORDER BY created_at ASC, id ASC"
        ),
        [format_ts(&now)],
    )
}

/// Jobs of any status created strictly before `cutoff`, oldest first.
pub fn list_older_than(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<Job>> {
    collect_jobs(
        conn,
        &format!(
            "SELECT {COLS} FROM conversion_jobs
             WHERE created_at < ?1
             ORDER BY created_at ASC, id ASC"
        ),
        [format_ts(&cutoff)],
    )
}

/// The `limit` most recently created jobs, newest first.
pub fn list_recent(conn: &Connection, limit: i64) -> Result<Vec<Job>> {
    collect_jobs(
        conn,
        &format!(
            "SELECT {COLS} FROM conversion_jobs
             ORDER BY created_at DESC, id DESC LIMIT ?1"
        ),
        [limit],
    )
}

/// Remove a job record. Returns `false` if it was already gone.
pub fn delete_job(conn: &Connection, id: JobId) -> Result<bool> {
    let affected = conn
        .execute(
            "DELETE FROM conversion_jobs WHERE id = ?1",
            [id.to_string()],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(affected > 0)
}

/// Remove a job record unless it is `processing` and was last updated at or
/// after `active_since`. With `None` every `processing` job is kept.
///
/// Returns `false` if nothing was deleted, either because the record is gone
/// or because it is still active.
pub fn delete_unless_active(
    conn: &Connection,
    id: JobId,
    active_since: Option<DateTime<Utc>>,
) -> Result<bool> {
    let affected = conn
        .execute(
            "DELETE FROM conversion_jobs
             WHERE id = ?1 AND (status != 'processing' OR updated_at < ?2)",
            rusqlite::params![id.to_string(), active_since.as_ref().map(format_ts)],
        )
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(affected > 0)
}

/// Number of jobs of any status whose expiry lies strictly before `now`.
pub fn count_expired(conn: &Connection, now: DateTime<Utc>) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM conversion_jobs WHERE expires_at < ?1",
        [format_ts(&now)],
        |row| row.get(0),
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Store-wide totals with a per-status breakdown.
pub fn aggregate(conn: &Connection) -> Result<JobAggregate> {
    let mut stmt = conn
        .prepare(
            "SELECT status, COUNT(*), COALESCE(SUM(file_size), 0)
             FROM conversion_jobs GROUP BY status",
        )
        .map_err(|e| Error::database(e.to_string()))?;

    let rows = stmt
        .query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let total_size: i64 = row.get(2)?;
            Ok((status, count, total_size))
        })
        .map_err(|e| Error::database(e.to_string()))?;

    let mut agg = JobAggregate::default();
    for row in rows {
        let (status, count, total_size) = row.map_err(|e| Error::database(e.to_string()))?;
        let status: JobStatus = status.parse()?;
        agg.total_files += count;
        agg.total_size += total_size;
        agg.status_breakdown
            .insert(status, StatusTotals { count, total_size });
    }
    Ok(agg)
}

/// Fail every job left in `processing`, e.g. by a crash mid-conversion.
///
/// Returns the number of jobs updated.
pub fn fail_stale_processing(
    conn: &Connection,
    message: &str,
    now: DateTime<Utc>,
) -> Result<usize> {
    conn.execute(
        "UPDATE conversion_jobs SET status='failed', error_message=?1, updated_at=?2
         WHERE status='processing'",
        rusqlite::params![message, format_ts(&now)],
    )
    .map_err(|e| Error::database(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewJob;
    use crate::pool::{get_conn, init_memory_pool};
    use chrono::Duration;
    use mc_core::{MediaKind, NodeLocation};

    fn setup() -> crate::pool::PooledConnection {
        // The pooled connection keeps its pool, and so the database, alive.
        get_conn(&init_memory_pool().unwrap()).unwrap()
    }

    fn new_job(now: DateTime<Utc>, size: i64) -> Job {
        NewJob {
            id: JobId::new(),
            original_filename: "song.wav".into(),
            source_format: "wav".into(),
            target_format: "mp3".into(),
            media_kind: MediaKind::Audio,
            location: NodeLocation::ServerA,
            source_path: Some("uploads/original/song.wav".into()),
            file_size: size,
        }
        .into_job(now, Duration::hours(24))
        .unwrap()
    }

    #[test]
    fn test_create_and_get() {
        let conn = setup();
        let now = Utc::now();
        let job = new_job(now, 42);
        create_job(&conn, &job).unwrap();

        let fetched = get_job(&conn, job.id).unwrap();
        assert_eq!(fetched, job);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let conn = setup();
        let job = new_job(Utc::now(), 1);
        create_job(&conn, &job).unwrap();
        let err = create_job(&conn, &job).unwrap_err();
        assert!(matches!(err, Error::DuplicateId(_)));
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let conn = setup();
        let err = get_job(&conn, JobId::new()).unwrap_err();
        assert_eq!(err.http_status(), 404);
        assert!(find_job(&conn, JobId::new()).unwrap().is_none());
    }

    #[test]
    fn test_update_refreshes_updated_at() {
        let conn = setup();
        let now = Utc::now();
        let job = new_job(now, 1);
        create_job(&conn, &job).unwrap();

        let later = now + Duration::seconds(5);
        let updated = update_job(&conn, job.id, later, |j| {
            j.status = JobStatus::Processing;
            j.progress = 10;
        })
        .unwrap();
        assert_eq!(updated.updated_at, later.trunc_subsecs(6));
        assert_eq!(get_job(&conn, job.id).unwrap().updated_at, updated.updated_at);
        assert_eq!(get_job(&conn, job.id).unwrap().progress, 10);
    }

    #[test]
    fn test_update_rejects_illegal_transition() {
        let conn = setup();
        let now = Utc::now();
        let job = new_job(now, 1);
        create_job(&conn, &job).unwrap();

        let err = update_job(&conn, job.id, now, |j| {
            j.status = JobStatus::Completed;
            j.progress = 100;
            j.converted_path = Some("x.mp3".into());
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(get_job(&conn, job.id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn test_update_rejects_progress_regression() {
        let conn = setup();
        let now = Utc::now();
        let job = new_job(now, 1);
        create_job(&conn, &job).unwrap();
        claim_pending(&conn, job.id, 50, now).unwrap();

        let err = update_job(&conn, job.id, now, |j| j.progress = 10).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // Failing keeps whatever progress was reached.
        let failed = update_job(&conn, job.id, now, |j| {
            j.status = JobStatus::Failed;
            j.error_message = Some("boom".into());
        })
        .unwrap();
        assert_eq!(failed.progress, 50);
    }

    #[test]
    fn test_update_rejects_expiry_change() {
        let conn = setup();
        let now = Utc::now();
        let job = new_job(now, 1);
        create_job(&conn, &job).unwrap();

        let err = update_job(&conn, job.id, now, |j| {
            j.expires_at = j.expires_at + Duration::hours(1)
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_update_missing_job() {
        let conn = setup();
        let err = update_job(&conn, JobId::new(), Utc::now(), |_| {}).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_claim_only_once() {
        let conn = setup();
        let now = Utc::now();
        let job = new_job(now, 1);
        create_job(&conn, &job).unwrap();

        let claimed = claim_pending(&conn, job.id, 10, now).unwrap();
        assert_eq!(claimed.status, JobStatus::Processing);
        assert_eq!(claimed.progress, 10);

        let err = claim_pending(&conn, job.id, 10, now).unwrap_err();
        assert!(matches!(err, Error::AlreadyProcessing(_)));

        let err = claim_pending(&conn, JobId::new(), 10, now).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_list_expired_excludes_processing() {
        let conn = setup();
        let t0 = Utc::now() - Duration::hours(30);

        let old_done = new_job(t0, 1);
        let old_running = new_job(t0 + Duration::seconds(1), 1);
        let fresh = new_job(Utc::now(), 1);
        for j in [&old_done, &old_running, &fresh] {
            create_job(&conn, j).unwrap();
        }
        claim_pending(&conn, old_running.id, 10, t0).unwrap();

        let expired = list_expired(&conn, Utc::now()).unwrap();
        let ids: Vec<_> = expired.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![old_done.id]);

        assert_eq!(count_expired(&conn, Utc::now()).unwrap(), 2);
    }

    #[test]
    fn test_list_expired_boundary_is_strict() {
        let conn = setup();
        let now = Utc::now();
        let job = new_job(now, 1);
        create_job(&conn, &job).unwrap();

        assert!(list_expired(&conn, job.expires_at).unwrap().is_empty());
        assert_eq!(
            list_expired(&conn, job.expires_at + Duration::microseconds(1))
                .unwrap()
                .len(),
            1
        );
    }

    /// One job per status, created an hour apart starting at `base`, in
    /// the order pending, processing, completed, failed.
    fn one_of_each(conn: &Connection, base: DateTime<Utc>) -> Vec<Job> {
        let jobs: Vec<_> = (0..4)
            .map(|i| new_job(base + Duration::hours(i), 1))
            .collect();
        for j in jobs.iter().rev() {
            create_job(conn, j).unwrap();
        }
        claim_pending(conn, jobs[1].id, 10, base).unwrap();
        claim_pending(conn, jobs[2].id, 10, base).unwrap();
        update_job(conn, jobs[2].id, base, |j| {
            j.status = JobStatus::Completed;
            j.progress = 100;
            j.converted_path = Some("song.mp3".into());
        })
        .unwrap();
        update_job(conn, jobs[3].id, base, |j| {
            j.status = JobStatus::Failed;
            j.error_message = Some("boom".into());
        })
        .unwrap();
        jobs
    }

    #[test]
    fn test_list_older_than_all_statuses_oldest_first() {
        let conn = setup();
        let base = Utc::now() - Duration::hours(72);
        let jobs = one_of_each(&conn, base);
        let fresh = new_job(Utc::now(), 1);
        create_job(&conn, &fresh).unwrap();

        let old = list_older_than(&conn, Utc::now() - Duration::hours(48)).unwrap();
        let ids: Vec<_> = old.iter().map(|j| j.id).collect();
        let expected: Vec<_> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, expected);
        let statuses: Vec<_> = old.iter().map(|j| j.status).collect();
        assert_eq!(
            statuses,
            vec![
                JobStatus::Pending,
                JobStatus::Processing,
                JobStatus::Completed,
                JobStatus::Failed,
            ]
        );
    }

    #[test]
    fn test_list_older_than_cutoff_edges() {
        let conn = setup();
        let now = Utc::now();
        let base = now - Duration::hours(10);
        one_of_each(&conn, base);
        let latest = new_job(now, 1);
        create_job(&conn, &latest).unwrap();

        // A cutoff of "now" matches everything created before it.
        assert_eq!(
            list_older_than(&conn, now + Duration::microseconds(1))
                .unwrap()
                .len(),
            5
        );
        // Strict: a job created exactly at the cutoff is not older than it.
        assert_eq!(list_older_than(&conn, latest.created_at).unwrap().len(), 4);
        // A cutoff before every job matches nothing.
        assert!(list_older_than(&conn, base).unwrap().is_empty());
    }

    #[test]
    fn test_delete_unless_active() {
        let conn = setup();
        let base = Utc::now() - Duration::hours(72);
        let jobs = one_of_each(&conn, base);
        let (pending, processing) = (&jobs[0], &jobs[1]);

        // No idle cutoff: processing jobs are always kept.
        assert!(!delete_unless_active(&conn, processing.id, None).unwrap());
        assert!(delete_unless_active(&conn, pending.id, None).unwrap());

        // Updated at `base`, so only a cutoff after that releases it.
        assert!(!delete_unless_active(&conn, processing.id, Some(base)).unwrap());
        assert!(find_job(&conn, processing.id).unwrap().is_some());
        assert!(
            delete_unless_active(&conn, processing.id, Some(base + Duration::seconds(1)))
                .unwrap()
        );
        assert!(find_job(&conn, processing.id).unwrap().is_none());

        // Gone is also `false`.
        assert!(!delete_unless_active(&conn, pending.id, None).unwrap());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let conn = setup();
        let job = new_job(Utc::now(), 1);
        create_job(&conn, &job).unwrap();

        assert!(delete_job(&conn, job.id).unwrap());
        assert!(!delete_job(&conn, job.id).unwrap());
        assert!(find_job(&conn, job.id).unwrap().is_none());
    }

    #[test]
    fn test_aggregate() {
        let conn = setup();
        let now = Utc::now();
        let a = new_job(now, 100);
        let b = new_job(now, 50);
        create_job(&conn, &a).unwrap();
        create_job(&conn, &b).unwrap();
        claim_pending(&conn, b.id, 10, now).unwrap();

        let agg = aggregate(&conn).unwrap();
        assert_eq!(agg.total_files, 2);
        assert_eq!(agg.total_size, 150);
        assert_eq!(agg.status_breakdown[&JobStatus::Pending].count, 1);
        assert_eq!(agg.status_breakdown[&JobStatus::Processing].total_size, 50);
    }

    #[test]
    fn test_aggregate_empty_store() {
        let conn = setup();
        let agg = aggregate(&conn).unwrap();
        assert_eq!(agg.total_files, 0);
        assert!(agg.status_breakdown.is_empty());
    }

    #[test]
    fn test_list_recent_newest_first() {
        let conn = setup();
        let now = Utc::now();
        let older = new_job(now - Duration::minutes(5), 1);
        let newer = new_job(now, 1);
        create_job(&conn, &older).unwrap();
        create_job(&conn, &newer).unwrap();

        let recent = list_recent(&conn, 1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, newer.id);
    }

    #[test]
    fn test_fail_stale_processing() {
        let conn = setup();
        let now = Utc::now();
        let running = new_job(now, 1);
        let waiting = new_job(now, 1);
        create_job(&conn, &running).unwrap();
        create_job(&conn, &waiting).unwrap();
        claim_pending(&conn, running.id, 50, now).unwrap();

        assert_eq!(fail_stale_processing(&conn, "interrupted by restart", now).unwrap(), 1);

        let job = get_job(&conn, running.id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("interrupted by restart"));
        assert_eq!(get_job(&conn, waiting.id).unwrap().status, JobStatus::Pending);
    }
}
