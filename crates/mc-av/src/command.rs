//! Builder for executing external tool commands with timeout support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use mc_core::{Result, TranscodeFailure};
use tokio::process::Command;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use mc_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> mc_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-i").arg("in.wav")
///     .arg("-y").arg("out.mp3")
///     .execute()
///     .await?;
/// println!("{}", output.stderr);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// All failures surface as [`mc_core::Error::Transcode`]:
    ///
    /// - [`TranscodeFailure::ToolMissing`] if the program does not exist.
    /// - [`TranscodeFailure::Timeout`] if the ceiling elapsed. The child is
    ///   killed when its handle is dropped.
    /// - [`TranscodeFailure::NonZeroExit`] if the process exits unsuccessfully.
    /// - [`TranscodeFailure::Other`] for any other spawn or wait error.
    pub async fn execute(&self) -> Result<ToolOutput> {
        let program_name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                TranscodeFailure::ToolMissing(program_name.clone())
            } else {
                TranscodeFailure::Other(format!("failed to spawn {program_name}: {e}"))
            }
        })?;

        tracing::debug!(tool = %program_name, args = ?self.args, "Spawned tool");

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(TranscodeFailure::NonZeroExit {
                        status: output.status.to_string(),
                        stderr: tool_output.stderr.trim().to_string(),
                    }
                    .into());
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(TranscodeFailure::Other(format!(
                "I/O error waiting for {program_name}: {e}"
            ))
            .into()),
            // The wait future owned the child; dropping it kills the process.
            Err(_elapsed) => {
                tracing::warn!(tool = %program_name, timeout = ?self.timeout, "Tool timed out");
                Err(TranscodeFailure::Timeout(self.timeout).into())
            }
        }
    }
}
