//! # mc-av
//!
//! External tool handling for the mediaconv pipeline.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`tools`]) -- locate ffmpeg via config override or
//!   `PATH` and report its version.
//! - **Command execution** ([`ToolCommand`]) -- async builder with a hard
//!   timeout that kills the child process when it fires.
//! - **Transcoding** ([`Transcoder`], [`FfmpegTranscoder`]) -- the seam the
//!   executor calls to turn a source file into the target format.

pub mod command;
pub mod tools;
pub mod transcode;

// ---- Re-exports for convenience ----

pub use command::{ToolCommand, ToolOutput};
pub use tools::{check_tools, resolve_tool, ToolInfo};
pub use transcode::{FfmpegTranscoder, Transcoder};
