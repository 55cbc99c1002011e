//! mc-db: the job store.
//!
//! SQLite-backed persistence for conversion jobs with connection pooling,
//! embedded migrations, the [`models::Job`] record, and the query functions
//! every other component goes through to read or mutate a job.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
