//! Rust structs mapping to database tables.
//!
//! [`Job`] implements `from_row` for constructing itself from a
//! `rusqlite::Row` selected with [`crate::queries::jobs::COLS`].

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use mc_core::{Error, JobId, JobStatus, MediaKind, NodeLocation, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// helpers
// ---------------------------------------------------------------------------

/// Format a timestamp the way it is stored: RFC 3339, UTC, microsecond
/// precision. Every stored value has the same width.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_failure(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_text<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| conversion_failure(idx, e))
}

fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_failure(idx, e))
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// The canonical record of one conversion request.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub original_filename: String,
    pub source_format: String,
    pub target_format: String,
    pub media_kind: MediaKind,
    pub status: JobStatus,
    pub progress: u8,
    pub location: NodeLocation,
    pub source_path: Option<String>,
    pub converted_path: Option<String>,
    pub file_size: i64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Self> {
        let progress: i64 = row.get(6)?;
        Ok(Self {
            id: parse_text(row, 0)?,
            original_filename: row.get(1)?,
            source_format: row.get(2)?,
            target_format: row.get(3)?,
            media_kind: parse_text(row, 4)?,
            status: parse_text(row, 5)?,
            progress: u8::try_from(progress).map_err(|e| conversion_failure(6, e))?,
            location: parse_text(row, 7)?,
            source_path: row.get(8)?,
            converted_path: row.get(9)?,
            file_size: row.get(10)?,
            error_message: row.get(11)?,
            created_at: parse_ts(row, 12)?,
            expires_at: parse_ts(row, 13)?,
            updated_at: parse_ts(row, 14)?,
        })
    }

    /// A job is expired strictly after its expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Check the record-level invariants that must hold after every write.
    pub fn check_invariants(&self) -> Result<()> {
        if self.progress > 100 {
            return Err(Error::Validation(format!(
                "progress {} out of range",
                self.progress
            )));
        }
        if (self.progress == 100) != (self.status == JobStatus::Completed) {
            return Err(Error::Validation(format!(
                "progress {} inconsistent with status {}",
                self.progress, self.status
            )));
        }
        if self.converted_path.is_some() && self.status != JobStatus::Completed {
            return Err(Error::Validation(format!(
                "converted_path set on {} job",
                self.status
            )));
        }
        if self.error_message.is_some() && self.status != JobStatus::Failed {
            return Err(Error::Validation(format!(
                "error_message set on {} job",
                self.status
            )));
        }
        if self.expires_at < self.created_at {
            return Err(Error::Validation("expires_at precedes created_at".into()));
        }
        Ok(())
    }
}

/// Fields supplied by the caller when registering a new upload.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: JobId,
    pub original_filename: String,
    pub source_format: String,
    pub target_format: String,
    pub media_kind: MediaKind,
    pub location: NodeLocation,
    pub source_path: Option<String>,
    pub file_size: i64,
}

impl NewJob {
    /// Build the initial `pending` record, expiring `retention` after `now`.
    ///
    /// Timestamps are truncated to the stored microsecond precision. Fails
    /// with [`Error::Validation`] when the expiry is not representable.
    pub fn into_job(self, now: DateTime<Utc>, retention: chrono::Duration) -> Result<Job> {
        let now = now.trunc_subsecs(6);
        let expires_at = now.checked_add_signed(retention).ok_or_else(|| {
            Error::Validation(format!(
                "retention of {}h puts expiry out of range",
                retention.num_hours()
            ))
        })?;
        Ok(Job {
            id: self.id,
            original_filename: self.original_filename,
            source_format: self.source_format,
            target_format: self.target_format,
            media_kind: self.media_kind,
            status: JobStatus::Pending,
            progress: 0,
            location: self.location,
            source_path: self.source_path,
            converted_path: None,
            file_size: self.file_size,
            error_message: None,
            created_at: now,
            expires_at,
            updated_at: now,
        })
    }
}

// ---------------------------------------------------------------------------
// Aggregates
// ---------------------------------------------------------------------------

/// Count and byte total for one status bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusTotals {
    pub count: i64,
    pub total_size: i64,
}

/// Store-wide totals used by the storage report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobAggregate {
    pub total_files: i64,
    pub total_size: i64,
    pub status_breakdown: BTreeMap<JobStatus, StatusTotals>,
}
