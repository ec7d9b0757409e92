//! Builder for executing external tool commands with timeout support.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use wf_core::Error;

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

/// How a streamed execution ended.
#[derive(Debug)]
pub enum StreamOutcome {
    /// The process exited on its own, successfully or not.
    Exited {
        status: ExitStatus,
        /// Captured standard error (lossy UTF-8).
        stderr: String,
    },
    /// The cancellation token fired; the process was killed.
    Cancelled,
    /// The timeout elapsed; the process was killed.
    TimedOut(Duration),
}

enum Ending {
    Exited(ExitStatus),
    Cancelled,
    TimedOut,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use wf_codec::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> wf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffmpeg"))
///     .arg("-hide_banner")
///     .arg("-encoders")
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

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`wf_core::Error::Tool`] if spawning fails, the process times
    /// out, or it exits with a non-zero status (message includes stderr).
    pub async fn execute(&self) -> wf_core::Result<ToolOutput> {
        let program_name = self.program_name();

        let child = self
            .command()
            .spawn()
            .map_err(|e| Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        // The child is killed on drop, so a timeout cannot leak it.
        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(Error::tool(
                        program_name,
                        format!(
                            "exited with status {}: {}",
                            output.status,
                            tool_output.stderr.trim()
                        ),
                    ));
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            Err(_elapsed) => Err(Error::tool(
                program_name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Execute the command, handing each stdout line to `on_stdout_line` as
    /// it arrives.
    ///
    /// Stderr is collected in the background and returned once the process
    /// exits. A non-zero exit is *not* an error here; callers inspect
    /// [`StreamOutcome::Exited`] themselves.
    ///
    /// # Errors
    ///
    /// Returns [`wf_core::Error::Tool`] only if the process could not be
    /// spawned or waited on.
    pub async fn execute_streaming(
        &self,
        mut on_stdout_line: impl FnMut(&str),
        cancel: &CancellationToken,
    ) -> wf_core::Result<StreamOutcome> {
        let program_name = self.program_name();
        tracing::trace!(tool = %program_name, args = ?self.args, "Spawning");

        let mut child = self
            .command()
            .spawn()
            .map_err(|e| Error::tool(&program_name, format!("failed to spawn: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::tool(&program_name, "stdout was not captured"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::tool(&program_name, "stderr was not captured"))?;

        // Drain stderr concurrently so a chatty child never stalls on a full pipe.
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf).await;
            String::from_utf8_lossy(&buf).to_string()
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut stdout_open = true;
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let ending = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ending::Cancelled,
                _ = &mut deadline => break Ending::TimedOut,
                line = lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => on_stdout_line(&line),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        tracing::debug!(tool = %program_name, error = %e, "Stopped reading stdout");
                        stdout_open = false;
                    }
                },
                status = child.wait(), if !stdout_open => match status {
                    Ok(status) => break Ending::Exited(status),
                    Err(e) => {
                        stderr_task.abort();
                        return Err(Error::tool(
                            program_name,
                            format!("I/O error waiting for process: {e}"),
                        ));
                    }
                },
            }
        };

        match ending {
            Ending::Exited(status) => {
                let stderr = stderr_task.await.unwrap_or_default();
                Ok(StreamOutcome::Exited { status, stderr })
            }
            Ending::Cancelled => {
                kill(&mut child, &program_name).await;
                stderr_task.abort();
                tracing::debug!(tool = %program_name, "Killed after cancellation");
                Ok(StreamOutcome::Cancelled)
            }
            Ending::TimedOut => {
                kill(&mut child, &program_name).await;
                stderr_task.abort();
                tracing::warn!(tool = %program_name, timeout = ?self.timeout, "Killed after timeout");
                Ok(StreamOutcome::TimedOut(self.timeout))
            }
        }
    }
}

async fn kill(child: &mut tokio::process::Child, program_name: &str) {
    if let Err(e) = child.kill().await {
        tracing::warn!(tool = %program_name, error = %e, "Failed to kill process");
    }
}
