//! Embedded SQL migrations and runner.
//!
//! Migrations are stored as `&str` constants and executed in order.  A
//! `schema_migrations` table tracks which versions have been applied.

use rusqlite::Connection;
use mc_core::{Error, Result};

/// V1: the conversion job table.
///
/// Timestamps are fixed-width RFC 3339 strings in UTC, so plain string
/// comparison orders them chronologically.
const V1_CONVERSION_JOBS: &str = r#"
CREATE TABLE conversion_jobs (
    id                TEXT PRIMARY KEY,
    original_filename TEXT NOT NULL,
    source_format     TEXT NOT NULL,
    target_format     TEXT NOT NULL,
    media_kind        TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'pending'
                      CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    progress          INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
    location          TEXT NOT NULL DEFAULT 'server_a',
    source_path       TEXT,
    converted_path    TEXT,
    file_size         INTEGER NOT NULL DEFAULT 0,
    error_message     TEXT,
    created_at        TEXT NOT NULL,
    expires_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);
"#;

/// V2: indexes backing the sweep and listing queries.
const V2_SWEEP_INDEXES: &str = r#"
CREATE INDEX idx_conversion_jobs_expires ON conversion_jobs(expires_at);
CREATE INDEX idx_conversion_jobs_created ON conversion_jobs(created_at);
CREATE INDEX idx_conversion_jobs_status ON conversion_jobs(status);
"#;

/// Ordered list of (version, sql) pairs.
const MIGRATIONS: &[(i64, &str)] = &[(1, V1_CONVERSION_JOBS), (2, V2_SWEEP_INDEXES)];

/// Run all pending migrations on `conn`.
///
/// Creates the `schema_migrations` tracking table if it does not exist,
/// then applies each outstanding migration inside a transaction.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )
    .map_err(|e| Error::database(format!("Failed to create schema_migrations: {e}")))?;

    for &(version, sql) in MIGRATIONS {
        let already: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM schema_migrations WHERE version = ?1",
                [version],
                |row| row.get(0),
            )
            .map_err(|e| Error::database(e.to_string()))?;

        if already {
            continue;
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::database(e.to_string()))?;

        tx.execute_batch(sql)
            .map_err(|e| Error::database(format!("Migration V{version} failed: {e}")))?;

        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?1)",
            [version],
        )
        .map_err(|e| Error::database(e.to_string()))?;

        tx.commit().map_err(|e| Error::database(e.to_string()))?;

        tracing::debug!(version, "Applied migration");
    }

    Ok(())
}
