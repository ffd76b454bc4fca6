//! One-shot execution of short-lived tools (ffprobe, nvidia-smi) with a timeout.
//!
//! Long-running transcoders are not run through here; they are owned by the
//! process supervisor in the main crate.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;

use crate::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// A builder for constructing and executing a short external tool invocation.
///
/// # Example
///
/// ```no_run
/// use classcast_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> classcast_av::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .args(["-v", "error", "-show_entries", "stream=codec_type"])
///     .arg("/path/to/lesson.mp4")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
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
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time. The child is killed when it elapses.
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
    /// - [`Error::ToolNotFound`] if the program cannot be spawned because it
    ///   does not exist.
    /// - [`Error::ToolFailed`] on timeout, on any other spawn/wait failure,
    ///   or on a non-zero exit (message includes stderr).
    pub async fn execute(&self) -> Result<ToolOutput> {
        let name = self.program_name();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::tool_not_found(&name)
            } else {
                Error::tool_failed(&name, format!("failed to spawn: {e}"))
            }
        })?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let out = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };
                if !out.status.success() {
                    return Err(Error::tool_failed(
                        name,
                        format!("exited with status {}: {}", out.status, out.stderr.trim()),
                    ));
                }
                Ok(out)
            }
            Ok(Err(e)) => Err(Error::tool_failed(
                name,
                format!("I/O error waiting for process: {e}"),
            )),
            // Dropping the future drops the child, and kill_on_drop reaps it.
            Err(_elapsed) => Err(Error::tool_failed(
                name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }
}
