use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{OrchestratorError, Result};

/// Captured result of a finished subprocess.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Convert a non-zero exit into a structured tool error.
    pub fn expect_success(self, tool: &str, step: &str) -> Result<CommandOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(OrchestratorError::Tool {
                tool: tool.to_string(),
                step: step.to_string(),
                status: self.status,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runner responsible for executing external tool commands (helm, kubectl).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, binary: &'static str, args: &[&str], timeout: Duration)
    -> Result<CommandOutput>;

    /// Run with data piped to stdin (used for `kubectl apply -f -`).
    async fn run_with_stdin(
        &self,
        binary: &'static str,
        args: &[&str],
        stdin: &str,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

/// Default runner spawning real processes through tokio.
pub struct ProcessCommandRunner;

impl ProcessCommandRunner {
    async fn spawn_and_wait(
        binary: &'static str,
        args: &[&str],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut command = Command::new(binary);
        command
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                OrchestratorError::ToolMissing { binary }
            } else {
                OrchestratorError::Io(err)
            }
        })?;

        if let Some(input) = stdin {
            if let Some(mut handle) = child.stdin.take() {
                handle.write_all(input.as_bytes()).await?;
                drop(handle);
            }
        }

        let waited = tokio::time::timeout(timeout, child.wait_with_output()).await;
        match waited {
            Ok(output) => {
                let output = output?;
                let result = CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };
                debug!(
                    binary,
                    step = args.first().copied().unwrap_or("command"),
                    status = ?result.status,
                    "subprocess finished"
                );
                Ok(result)
            }
            Err(_) => Err(OrchestratorError::Tool {
                tool: binary.to_string(),
                step: args.first().copied().unwrap_or("command").to_string(),
                status: None,
                stderr: format!("timed out after {}s", timeout.as_secs()),
            }),
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(
        &self,
        binary: &'static str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        Self::spawn_and_wait(binary, args, None, timeout).await
    }

    async fn run_with_stdin(
        &self,
        binary: &'static str,
        args: &[&str],
        stdin: &str,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        Self::spawn_and_wait(binary, args, Some(stdin), timeout).await
    }
}

/// Check that a required binary is reachable on PATH.
pub fn probe(binary: &'static str) -> Result<()> {
    which::which(binary)
        .map(|_| ())
        .map_err(|_| OrchestratorError::ToolMissing { binary })
}
