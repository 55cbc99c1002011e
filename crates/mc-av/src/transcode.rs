//! The transcoder seam used by the conversion executor.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use mc_core::config::ToolsConfig;
use mc_core::{Result, TranscodeFailure};

use crate::command::ToolCommand;
use crate::tools::resolve_tool;

/// Converts one media file into another format.
///
/// Implementations write the converted artifact to `output`, whose
/// extension names the target format. An `Err` means no usable output was
/// produced; callers remove whatever partial file remains.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()>;
}

/// [`Transcoder`] backed by the `ffmpeg` command-line tool.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: Option<PathBuf>,
    timeout: Duration,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: Option<PathBuf>, timeout: Duration) -> Self {
        Self { ffmpeg, timeout }
    }

    /// Resolve ffmpeg once from config or `PATH`.
    ///
    /// A missing binary is not an error here; each conversion then fails
    /// with [`TranscodeFailure::ToolMissing`].
    pub fn from_config(config: &ToolsConfig) -> Self {
        let ffmpeg = resolve_tool("ffmpeg", config.ffmpeg_path.as_deref());
        if ffmpeg.is_none() {
            tracing::warn!("ffmpeg not found; conversions will fail until it is installed");
        }
        Self::new(ffmpeg, config.transcode_timeout())
    }

    pub fn ffmpeg_path(&self) -> Option<&Path> {
        self.ffmpeg.as_deref()
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<()> {
        let ffmpeg = self
            .ffmpeg
            .clone()
            .ok_or_else(|| TranscodeFailure::ToolMissing("ffmpeg".into()))?;

        ToolCommand::new(ffmpeg)
            .args([
                String::from("-i"),
                input.to_string_lossy().into_owned(),
                String::from("-y"),
                output.to_string_lossy().into_owned(),
            ])
            .timeout(self.timeout)
            .execute()
            .await?;

        Ok(())
    }
}
