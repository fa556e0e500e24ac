#![allow(dead_code)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use masterline::process::{CommandOutput, Runner, RunnerError};
use masterline::stages::{EqEngine, EqError, EqSettings};

/// Bytes the fake tool prepends to its input when it "masters" a file.
pub const MASTERED_PREFIX: &[u8] = b"MASTERED:";
/// Bytes the fake EQ engine prepends when it "enhances" a file.
pub const EQ_PREFIX: &[u8] = b"EQ:";

#[derive(Debug, Clone)]
pub enum ToolBehavior {
    /// `--version` works and `master` writes the output.
    Succeeds,
    /// Not installed.
    Missing,
    /// Installed, but `master` exits non-zero with this stderr.
    Fails { exit_code: i32, stderr: String },
    /// `master` never finishes.
    TimesOut,
    /// `master` exits 0 without writing anything.
    NoOutput,
    /// `master` signals `entered`, waits for `release`, then acts as `then`.
    Gated {
        entered: Arc<Notify>,
        release: Arc<Notify>,
        then: Box<ToolBehavior>,
    },
}

impl ToolBehavior {
    /// Holds `master` open until the returned `release` is notified.
    pub fn gated(then: ToolBehavior) -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let behavior = ToolBehavior::Gated {
            entered: entered.clone(),
            release: release.clone(),
            then: Box::new(then),
        };
        (behavior, entered, release)
    }
}

/// Scripted AI mastering tool.
pub struct FakeMasteringTool {
    behavior: ToolBehavior,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeMasteringTool {
    pub fn new(behavior: ToolBehavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every invocation's arguments, probes included.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn master_calls(&self) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|args| args.first().map(String::as_str) == Some("master"))
            .collect()
    }
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[async_trait]
impl Runner for FakeMasteringTool {
    async fn run(
        &self,
        program: &Path,
        args: &[OsString],
        timeout: Duration,
    ) -> Result<CommandOutput, RunnerError> {
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        self.calls.lock().unwrap().push(args.clone());

        if let ToolBehavior::Missing = self.behavior {
            return Err(RunnerError::Spawn {
                program: program.to_path_buf(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        if args.first().map(String::as_str) == Some("--version") {
            return Ok(CommandOutput {
                exit_code: Some(0),
                stdout: "ai-mastering 2.1.0\n".to_string(),
                stderr: String::new(),
            });
        }

        let behavior = match &self.behavior {
            ToolBehavior::Gated {
                entered,
                release,
                then,
            } => {
                entered.notify_one();
                release.notified().await;
                then.as_ref()
            }
            other => other,
        };

        match behavior {
            ToolBehavior::Succeeds => {
                let input = arg_after(&args, "--input").expect("--input");
                let output = arg_after(&args, "--output").expect("--output");
                let mut bytes = MASTERED_PREFIX.to_vec();
                bytes.extend(std::fs::read(input).expect("read input"));
                std::fs::write(output, bytes).expect("write output");
                Ok(CommandOutput {
                    exit_code: Some(0),
                    ..CommandOutput::default()
                })
            }
            ToolBehavior::Fails { exit_code, stderr } => {
                // A crashing tool may leave a partial file behind.
                if let Some(output) = arg_after(&args, "--output") {
                    std::fs::write(output, b"partial").expect("write partial");
                }
                Ok(CommandOutput {
                    exit_code: Some(*exit_code),
                    stdout: String::new(),
                    stderr: stderr.clone(),
                })
            }
            ToolBehavior::TimesOut => Err(RunnerError::TimedOut {
                program: program.to_path_buf(),
                timeout,
            }),
            ToolBehavior::NoOutput => Ok(CommandOutput {
                exit_code: Some(0),
                ..CommandOutput::default()
            }),
            ToolBehavior::Missing | ToolBehavior::Gated { .. } => unreachable!(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EqBehavior {
    Succeeds,
    AlwaysFails,
    /// Reports success but writes nothing.
    LiesAboutOutput,
}

/// Scripted EQ engine.
pub struct FakeEqEngine {
    behavior: EqBehavior,
    calls: AtomicUsize,
    last_settings: Mutex<Option<EqSettings>>,
}

impl FakeEqEngine {
    pub fn new(behavior: EqBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
            last_settings: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_settings(&self) -> Option<EqSettings> {
        self.last_settings.lock().unwrap().clone()
    }
}

#[async_trait]
impl EqEngine for FakeEqEngine {
    async fn enhance(
        &self,
        input: &Path,
        settings: &EqSettings,
        output: &Path,
    ) -> Result<PathBuf, EqError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_settings.lock().unwrap() = Some(settings.clone());

        match self.behavior {
            EqBehavior::Succeeds => {
                let mut bytes = EQ_PREFIX.to_vec();
                bytes.extend(std::fs::read(input).expect("read stage 1 output"));
                std::fs::write(output, bytes).expect("write eq output");
                Ok(output.to_path_buf())
            }
            EqBehavior::AlwaysFails => {
                Err(EqError::Engine("filter graph exploded".to_string()))
            }
            EqBehavior::LiesAboutOutput => Ok(output.to_path_buf()),
        }
    }
}
