//! Unified error type for the mediaconv application.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].

use std::fmt;
use std::time::Duration;

/// Why a transcoder invocation did not produce an output artifact.
///
/// Every variant ends the job in the same `failed` state; the variant only
/// changes the human-readable message stored on the job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscodeFailure {
    /// The process exceeded the hard execution ceiling and was killed.
    #[error("conversion timeout after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The transcoder binary could not be located or spawned.
    #[error("tool not found: {0}")]
    ToolMissing(String),

    /// The process ran but exited unsuccessfully.
    #[error("transcoder exited with {status}: {stderr}")]
    NonZeroExit {
        /// Exit status as reported by the OS.
        status: String,
        /// Trimmed standard error output.
        stderr: String,
    },

    /// Anything else that went wrong while running the conversion.
    #[error("{0}")]
    Other(String),
}

/// Unified error type covering all failure modes in mediaconv.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "job").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// A job with the same identifier already exists.
    #[error("Duplicate job id: {0}")]
    DuplicateId(String),

    /// The job has left `pending` and cannot be dispatched again.
    #[error("Job {0} has already been processed")]
    AlreadyProcessing(String),

    /// The job is past its expiry and its data is no longer served.
    #[error("Job {0} has expired")]
    Expired(String),

    /// The external transcoder failed.
    #[error("Transcode failed: {0}")]
    Transcode(#[from] TranscodeFailure),

    /// Deleting or writing an artifact on disk failed.
    #[error("Storage I/O error at {path}: {source}")]
    StorageIo {
        /// The artifact path involved.
        path: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The cooperating node could not be notified.
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A database operation failed.
    #[error("Database error: {source}")]
    Database {
        /// The underlying database error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::DuplicateId(_) => 409,
            Error::AlreadyProcessing(_) => 409,
            Error::Expired(_) => 410,
            Error::Transcode(_) => 502,
            Error::StorageIo { .. } => 500,
            Error::PeerUnreachable(_) => 502,
            Error::Validation(_) => 400,
            Error::Database { .. } => 500,
            Error::Io { .. } => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Short machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::DuplicateId(_) => "duplicate_id",
            Error::AlreadyProcessing(_) => "already_processing",
            Error::Expired(_) => "expired",
            Error::Transcode(_) => "transcode_failed",
            Error::StorageIo { .. } => "storage_io_failed",
            Error::PeerUnreachable(_) => "peer_unreachable",
            Error::Validation(_) => "validation_error",
            Error::Database { .. } => "database_error",
            Error::Io { .. } => "io_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Database`].
    pub fn database(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Database {
            source: source.into(),
        }
    }

    /// Convenience constructor for [`Error::StorageIo`].
    pub fn storage_io(path: impl Into<String>, source: std::io::Error) -> Self {
        Error::StorageIo {
            path: path.into(),
            source,
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
