//! Subprocess invocation with a hard timeout.
//!
//! Every external tool the pipeline touches goes through [`Runner`], so the
//! stages can be driven by a fake in tests and by [`TokioRunner`] in
//! production.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::sanitize;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Failed to start '{program}': {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' did not finish within {timeout:?}")]
    TimedOut { program: PathBuf, timeout: Duration },

    #[error("Failed waiting for '{program}': {source}")]
    Wait {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RunnerError {
    /// True when the program could not be found on disk or in `PATH`.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RunnerError::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs `program` with `args`. A process still running at `timeout` is
    /// killed and reported as [`RunnerError::TimedOut`].
    async fn run(
        &self,
        program: &Path,
        args: &[OsString],
        timeout: Duration,
    ) -> Result<CommandOutput, RunnerError>;
}

/// Production runner backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioRunner;

impl TokioRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Runner for TokioRunner {
    async fn run(
        &self,
        program: &Path,
        args: &[OsString],
        timeout: Duration,
    ) -> Result<CommandOutput, RunnerError> {
        debug!(
            program = %sanitize::redact_path(program),
            args = args.len(),
            timeout_secs = timeout.as_secs(),
            "Spawning subprocess"
        );

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the child on timeout sends SIGKILL.
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| RunnerError::Spawn {
            program: program.to_path_buf(),
            source: e,
        })?;

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
            Ok(Err(e)) => Err(RunnerError::Wait {
                program: program.to_path_buf(),
                source: e,
            }),
            Err(_) => Err(RunnerError::TimedOut {
                program: program.to_path_buf(),
                timeout,
            }),
        }
    }
}
