//! Stage 2: optional EQ enhancement.
//!
//! The filter math lives in an external [`EqEngine`]. Any engine failure is
//! absorbed here: the job continues with the Stage 1 output.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::process::{Runner, RunnerError};
use crate::sanitize;
use crate::storage::StoredPath;

/// Per-band gains in dB plus an enable flag, as stored on a preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EqSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub bass: f64,
    #[serde(default)]
    pub low_mid: f64,
    #[serde(default)]
    pub mid: f64,
    #[serde(default)]
    pub high_mid: f64,
    #[serde(default)]
    pub treble: f64,
}

fn default_true() -> bool {
    true
}

impl Default for EqSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            bass: 0.0,
            low_mid: 0.0,
            mid: 0.0,
            high_mid: 0.0,
            treble: 0.0,
        }
    }
}

impl EqSettings {
    /// Copy with every gain clamped into `[min_db, max_db]`. Non-finite
    /// gains become 0.
    pub fn clamped(&self, min_db: f64, max_db: f64) -> Self {
        let clamp = |gain: f64| {
            if gain.is_finite() {
                gain.clamp(min_db, max_db)
            } else {
                0.0
            }
        };
        Self {
            enabled: self.enabled,
            bass: clamp(self.bass),
            low_mid: clamp(self.low_mid),
            mid: clamp(self.mid),
            high_mid: clamp(self.high_mid),
            treble: clamp(self.treble),
        }
    }

    pub fn is_flat(&self) -> bool {
        [self.bass, self.low_mid, self.mid, self.high_mid, self.treble]
            .iter()
            .all(|g| *g == 0.0)
    }
}

#[derive(Error, Debug)]
pub enum EqError {
    #[error("EQ engine could not run: {0}")]
    Runner(#[from] RunnerError),

    #[error("EQ engine failed: {stderr}")]
    Failed { exit_code: Option<i32>, stderr: String },

    #[error("EQ engine produced no output at '{0}'")]
    MissingOutput(PathBuf),

    #[error("EQ engine error: {0}")]
    Engine(String),
}

/// External EQ collaborator.
#[async_trait]
pub trait EqEngine: Send + Sync {
    /// Applies `settings` to `input`, writing the result to `output`, and
    /// returns the path written.
    async fn enhance(
        &self,
        input: &Path,
        settings: &EqSettings,
        output: &Path,
    ) -> Result<PathBuf, EqError>;
}

/// EQ engine backed by ffmpeg's `bass`, `equalizer` and `treble` filters.
pub struct FfmpegEqEngine {
    runner: Arc<dyn Runner>,
    ffmpeg_path: PathBuf,
    timeout: Duration,
}

impl FfmpegEqEngine {
    pub fn new<P: AsRef<Path>>(runner: Arc<dyn Runner>, ffmpeg_path: P, timeout: Duration) -> Self {
        Self {
            runner,
            ffmpeg_path: ffmpeg_path.as_ref().to_path_buf(),
            timeout,
        }
    }

    /// ffmpeg `-af` filter chain for the given gains. Bands at 0 dB are
    /// omitted; an all-flat setting maps to `anull`.
    pub fn filter_chain(settings: &EqSettings) -> String {
        let mut filters = Vec::new();
        if settings.bass != 0.0 {
            filters.push(format!("bass=g={}:f=100", settings.bass));
        }
        for (freq, gain) in [
            (250, settings.low_mid),
            (1000, settings.mid),
            (4000, settings.high_mid),
        ] {
            if gain != 0.0 {
                filters.push(format!("equalizer=f={}:t=q:w=1:g={}", freq, gain));
            }
        }
        if settings.treble != 0.0 {
            filters.push(format!("treble=g={}:f=8000", settings.treble));
        }

        if filters.is_empty() {
            "anull".to_string()
        } else {
            filters.join(",")
        }
    }
}

#[async_trait]
impl EqEngine for FfmpegEqEngine {
    async fn enhance(
        &self,
        input: &Path,
        settings: &EqSettings,
        output: &Path,
    ) -> Result<PathBuf, EqError> {
        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-nostdin".into(),
            "-y".into(),
            "-i".into(),
            input.as_os_str().to_owned(),
            "-af".into(),
            Self::filter_chain(settings).into(),
            output.as_os_str().to_owned(),
        ];

        let result = self.runner.run(&self.ffmpeg_path, &args, self.timeout).await?;
        if !result.success() {
            return Err(EqError::Failed {
                exit_code: result.exit_code,
                stderr: sanitize::truncate_output(&result.stderr, 500),
            });
        }

        Ok(output.to_path_buf())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqSkipReason {
    GloballyDisabled,
    NoSettings,
    SettingsDisabled,
}

impl EqSkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EqSkipReason::GloballyDisabled => "globally_disabled",
            EqSkipReason::NoSettings => "no_settings",
            EqSkipReason::SettingsDisabled => "settings_disabled",
        }
    }
}

#[derive(Debug, Clone)]
pub enum EqOutcome {
    Skipped(EqSkipReason),
    Applied {
        output: StoredPath,
        settings: EqSettings,
    },
    /// The engine failed; the Stage 1 output stands.
    Degraded { error: String },
}

impl EqOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, EqOutcome::Applied { .. })
    }

    /// The file the pipeline should carry forward.
    pub fn final_path<'a>(&'a self, stage1: &'a StoredPath) -> &'a StoredPath {
        match self {
            EqOutcome::Applied { output, .. } => output,
            _ => stage1,
        }
    }
}

pub struct EqStage {
    engine: Arc<dyn EqEngine>,
    enabled: bool,
    min_gain_db: f64,
    max_gain_db: f64,
}

impl EqStage {
    pub fn new(engine: Arc<dyn EqEngine>, enabled: bool, min_gain_db: f64, max_gain_db: f64) -> Self {
        Self {
            engine,
            enabled,
            min_gain_db,
            max_gain_db,
        }
    }

    /// Never fails. See [`EqOutcome`].
    pub async fn run(
        &self,
        stage1: &StoredPath,
        settings: Option<&EqSettings>,
        output: &StoredPath,
    ) -> EqOutcome {
        if !self.enabled {
            return EqOutcome::Skipped(EqSkipReason::GloballyDisabled);
        }
        let settings = match settings {
            Some(s) if s.enabled => s.clamped(self.min_gain_db, self.max_gain_db),
            Some(_) => return EqOutcome::Skipped(EqSkipReason::SettingsDisabled),
            None => return EqOutcome::Skipped(EqSkipReason::NoSettings),
        };

        match self
            .engine
            .enhance(&stage1.absolute, &settings, &output.absolute)
            .await
        {
            Ok(written) if written == output.absolute && written.is_file() => {
                info!(
                    file = %sanitize::redact_path(&output.absolute),
                    "EQ enhancement applied"
                );
                EqOutcome::Applied {
                    output: output.clone(),
                    settings,
                }
            }
            Ok(written) => {
                let error = EqError::MissingOutput(written).to_string();
                warn!("EQ enhancement degraded to AI-only output: {}", error);
                EqOutcome::Degraded { error }
            }
            Err(e) => {
                warn!("EQ enhancement degraded to AI-only output: {}", e);
                EqOutcome::Degraded {
                    error: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    enum Behavior {
        Succeed,
        Fail,
        SkipWrite,
    }

    struct FakeEngine {
        behavior: Behavior,
        calls: AtomicUsize,
        last_settings: Mutex<Option<EqSettings>>,
    }

    impl FakeEngine {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
                last_settings: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl EqEngine for FakeEngine {
        async fn enhance(
            &self,
            _input: &Path,
            settings: &EqSettings,
            output: &Path,
        ) -> Result<PathBuf, EqError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_settings.lock().unwrap() = Some(settings.clone());
            match self.behavior {
                Behavior::Succeed => {
                    std::fs::write(output, b"enhanced").unwrap();
                    Ok(output.to_path_buf())
                }
                Behavior::Fail => Err(EqError::Engine("filter exploded".to_string())),
                Behavior::SkipWrite => Ok(output.to_path_buf()),
            }
        }
    }

    fn paths(tmp: &TempDir) -> (StoredPath, StoredPath) {
        let stage1 = StoredPath {
            relative: PathBuf::from("temp/j_ai_mastered.wav"),
            absolute: tmp.path().join("j_ai_mastered.wav"),
        };
        std::fs::write(&stage1.absolute, b"mastered").unwrap();
        let eq = StoredPath {
            relative: PathBuf::from("temp/j_eq_enhanced.wav"),
            absolute: tmp.path().join("j_eq_enhanced.wav"),
        };
        (stage1, eq)
    }

    fn boosted() -> EqSettings {
        EqSettings {
            bass: 3.0,
            treble: -2.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: EqSettings = serde_json::from_str(r#"{"bass": 3, "treble": -2}"#).unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.bass, 3.0);
        assert_eq!(settings.mid, 0.0);
        assert_eq!(settings.treble, -2.0);
    }

    #[test]
    fn test_clamped_bounds_gains() {
        let settings = EqSettings {
            bass: 30.0,
            mid: -40.0,
            treble: f64::NAN,
            high_mid: 5.0,
            ..Default::default()
        };
        let clamped = settings.clamped(-18.0, 18.0);
        assert_eq!(clamped.bass, 18.0);
        assert_eq!(clamped.mid, -18.0);
        assert_eq!(clamped.treble, 0.0);
        assert_eq!(clamped.high_mid, 5.0);
    }

    #[test]
    fn test_filter_chain() {
        assert_eq!(
            FfmpegEqEngine::filter_chain(&boosted()),
            "bass=g=3:f=100,treble=g=-2:f=8000"
        );
        let mid = EqSettings {
            mid: 1.5,
            ..Default::default()
        };
        assert_eq!(
            FfmpegEqEngine::filter_chain(&mid),
            "equalizer=f=1000:t=q:w=1:g=1.5"
        );
        assert_eq!(FfmpegEqEngine::filter_chain(&EqSettings::default()), "anull");
    }

    #[tokio::test]
    async fn test_skipped_when_globally_disabled() {
        let tmp = TempDir::new().unwrap();
        let (stage1, eq) = paths(&tmp);
        let engine = Arc::new(FakeEngine::new(Behavior::Succeed));
        let stage = EqStage::new(engine.clone(), false, -18.0, 18.0);

        let outcome = stage.run(&stage1, Some(&boosted()), &eq).await;

        assert!(matches!(outcome, EqOutcome::Skipped(EqSkipReason::GloballyDisabled)));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.final_path(&stage1), &stage1);
    }

    #[tokio::test]
    async fn test_skipped_without_settings_or_when_disabled() {
        let tmp = TempDir::new().unwrap();
        let (stage1, eq) = paths(&tmp);
        let engine = Arc::new(FakeEngine::new(Behavior::Succeed));
        let stage = EqStage::new(engine.clone(), true, -18.0, 18.0);

        let outcome = stage.run(&stage1, None, &eq).await;
        assert!(matches!(outcome, EqOutcome::Skipped(EqSkipReason::NoSettings)));

        let disabled = EqSettings {
            enabled: false,
            ..boosted()
        };
        let outcome = stage.run(&stage1, Some(&disabled), &eq).await;
        assert!(matches!(outcome, EqOutcome::Skipped(EqSkipReason::SettingsDisabled)));
        assert_eq!(engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_applied_passes_clamped_settings() {
        let tmp = TempDir::new().unwrap();
        let (stage1, eq) = paths(&tmp);
        let engine = Arc::new(FakeEngine::new(Behavior::Succeed));
        let stage = EqStage::new(engine.clone(), true, -6.0, 6.0);
        let loud = EqSettings {
            bass: 12.0,
            ..Default::default()
        };

        let outcome = stage.run(&stage1, Some(&loud), &eq).await;

        assert!(outcome.applied());
        assert_eq!(outcome.final_path(&stage1), &eq);
        let seen = engine.last_settings.lock().unwrap().clone().unwrap();
        assert_eq!(seen.bass, 6.0);
        // Stage 1 output stays for AI-only retention.
        assert!(stage1.absolute.exists());
    }

    #[tokio::test]
    async fn test_engine_failure_degrades() {
        let tmp = TempDir::new().unwrap();
        let (stage1, eq) = paths(&tmp);
        let stage = EqStage::new(Arc::new(FakeEngine::new(Behavior::Fail)), true, -18.0, 18.0);

        let outcome = stage.run(&stage1, Some(&boosted()), &eq).await;

        match &outcome {
            EqOutcome::Degraded { error } => assert!(error.contains("filter exploded")),
            other => panic!("Expected Degraded, got {:?}", other),
        }
        assert!(!outcome.applied());
        assert_eq!(outcome.final_path(&stage1), &stage1);
    }

    #[tokio::test]
    async fn test_missing_engine_output_degrades() {
        let tmp = TempDir::new().unwrap();
        let (stage1, eq) = paths(&tmp);
        let stage = EqStage::new(
            Arc::new(FakeEngine::new(Behavior::SkipWrite)),
            true,
            -18.0,
            18.0,
        );

        let outcome = stage.run(&stage1, Some(&boosted()), &eq).await;
        assert!(matches!(outcome, EqOutcome::Degraded { .. }));
    }

    struct RecordingRunner {
        exit_code: i32,
        args: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Runner for RecordingRunner {
        async fn run(
            &self,
            _program: &Path,
            args: &[OsString],
            _timeout: Duration,
        ) -> Result<CommandOutput, RunnerError> {
            *self.args.lock().unwrap() = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
            Ok(CommandOutput {
                exit_code: Some(self.exit_code),
                stdout: String::new(),
                stderr: "Invalid data found when processing input".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_ffmpeg_engine_arguments() {
        let runner = Arc::new(RecordingRunner {
            exit_code: 0,
            args: Mutex::new(vec![]),
        });
        let engine = FfmpegEqEngine::new(runner.clone(), "ffmpeg", Duration::from_secs(60));

        let written = engine
            .enhance(Path::new("/t/in.wav"), &boosted(), Path::new("/t/out.wav"))
            .await
            .unwrap();

        assert_eq!(written, PathBuf::from("/t/out.wav"));
        let args = runner.args.lock().unwrap().clone();
        assert_eq!(
            args,
            vec![
                "-hide_banner",
                "-nostdin",
                "-y",
                "-i",
                "/t/in.wav",
                "-af",
                "bass=g=3:f=100,treble=g=-2:f=8000",
                "/t/out.wav",
            ]
        );
    }

    #[tokio::test]
    async fn test_ffmpeg_engine_failure() {
        let runner = Arc::new(RecordingRunner {
            exit_code: 1,
            args: Mutex::new(vec![]),
        });
        let engine = FfmpegEqEngine::new(runner, "ffmpeg", Duration::from_secs(60));

        let err = engine
            .enhance(Path::new("/t/in.wav"), &boosted(), Path::new("/t/out.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, EqError::Failed { exit_code: Some(1), .. }));
    }
}
