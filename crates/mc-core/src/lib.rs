//! mc-core: shared types, IDs, errors, configuration, and event system.
//!
//! This crate is the foundational dependency for all other mc-* crates,
//! providing the job identifier, a unified error type, job-domain enums,
//! application configuration, and a broadcast event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod job;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result, TranscodeFailure};
pub use ids::JobId;
pub use job::*;
