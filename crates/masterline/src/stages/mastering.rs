//! Stage 1: AI loudness mastering through an external tool.
//!
//! The tool is invoked as
//! `<tool> master --input <path> --output <path> --target-loudness <lufs>`
//! and health-checked with `<tool> --version`. When the tool is disabled or
//! missing, the input is copied byte-for-byte instead.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::StageError;
use crate::process::{Runner, RunnerError};
use crate::sanitize;
use crate::storage::StoredPath;

/// Max bytes of tool stderr kept in the persisted error message.
const MAX_STDERR_LEN: usize = 2000;

#[derive(Debug, Clone)]
pub struct MasteringSettings {
    pub enabled: bool,
    pub tool_path: PathBuf,
    pub target_loudness: f64,
    pub timeout: Duration,
    pub probe_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassthroughReason {
    Disabled,
    ToolUnavailable,
}

impl PassthroughReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassthroughReason::Disabled => "disabled",
            PassthroughReason::ToolUnavailable => "tool_unavailable",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MasteringOutcome {
    pub output: StoredPath,
    /// Set when the input was copied instead of mastered.
    pub passthrough: Option<PassthroughReason>,
}

impl MasteringOutcome {
    pub fn tool_applied(&self) -> bool {
        self.passthrough.is_none()
    }
}

pub struct MasteringStage {
    runner: Arc<dyn Runner>,
    settings: MasteringSettings,
}

impl MasteringStage {
    pub fn new(runner: Arc<dyn Runner>, settings: MasteringSettings) -> Self {
        Self { runner, settings }
    }

    pub fn settings(&self) -> &MasteringSettings {
        &self.settings
    }

    /// Lightweight `--version` probe. Any failure counts as unavailable.
    pub async fn is_tool_available(&self) -> bool {
        let args = [OsString::from("--version")];
        match self
            .runner
            .run(&self.settings.tool_path, &args, self.settings.probe_timeout)
            .await
        {
            Ok(output) if output.success() => {
                debug!(version = %output.stdout.trim(), "Mastering tool available");
                true
            }
            Ok(output) => {
                debug!(
                    exit_code = ?output.exit_code,
                    "Mastering tool probe exited unsuccessfully"
                );
                false
            }
            Err(e) => {
                debug!("Mastering tool probe failed: {}", e);
                false
            }
        }
    }

    /// Produces the Stage 1 file at `output`.
    pub async fn run(&self, input: &Path, output: &StoredPath) -> Result<MasteringOutcome, StageError> {
        if !self.settings.enabled {
            info!("AI mastering disabled, using passthrough copy");
            return self.passthrough(input, output, PassthroughReason::Disabled).await;
        }

        if !self.is_tool_available().await {
            warn!(
                tool = %sanitize::redact_path(&self.settings.tool_path),
                "AI mastering tool unavailable, using passthrough copy"
            );
            return self
                .passthrough(input, output, PassthroughReason::ToolUnavailable)
                .await;
        }

        let args: Vec<OsString> = vec![
            "master".into(),
            "--input".into(),
            input.as_os_str().to_owned(),
            "--output".into(),
            output.absolute.as_os_str().to_owned(),
            "--target-loudness".into(),
            self.settings.target_loudness.to_string().into(),
        ];

        let result = self
            .runner
            .run(&self.settings.tool_path, &args, self.settings.timeout)
            .await
            .map_err(|e| match e {
                RunnerError::TimedOut { timeout, .. } => StageError::MasteringTimedOut {
                    seconds: timeout.as_secs(),
                },
                other => StageError::Runner(other),
            })?;

        if !result.success() {
            let detail = if result.stderr.trim().is_empty() {
                match result.exit_code {
                    Some(code) => format!("exit code {}", code),
                    None => "terminated by signal".to_string(),
                }
            } else {
                sanitize::truncate_output(&result.stderr, MAX_STDERR_LEN)
            };
            return Err(StageError::MasteringFailed {
                exit_code: result.exit_code,
                stderr: detail,
            });
        }

        if !output.absolute.is_file() {
            return Err(StageError::MasteringNoOutput {
                path: output.absolute.clone(),
            });
        }

        Ok(MasteringOutcome {
            output: output.clone(),
            passthrough: None,
        })
    }

    async fn passthrough(
        &self,
        input: &Path,
        output: &StoredPath,
        reason: PassthroughReason,
    ) -> Result<MasteringOutcome, StageError> {
        tokio::fs::copy(input, &output.absolute)
            .await
            .map_err(|e| StageError::Passthrough {
                path: output.absolute.clone(),
                source: e,
            })?;

        Ok(MasteringOutcome {
            output: output.clone(),
            passthrough: Some(reason),
        })
    }
}
