use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::db::{
    default_database_path, AudioFile, AudioFileStore, AudioFileUpdate, AudioStatus, Database,
    DatabaseError,
};
use crate::error::ConfigError;
use crate::process::{Runner, TokioRunner};
use crate::sanitize;
use crate::stages::{
    EqEngine, EqOutcome, EqStage, FfmpegEqEngine, MasteringOutcome, MasteringStage,
    PassthroughReason,
};
use crate::storage::{CleanupHandler, FileLifecycle, LocalDisk, Storage, StoredPath};
use crate::worker::job::{Job, JobResult};

use super::config::PipelineConfig;
use super::context::PipelineContext;
use super::error::{PipelineError, PipelineWarning};
use super::progress::{JobPhase, ProgressEvent, ProgressReporter};

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    store: Arc<dyn AudioFileStore>,
    lifecycle: FileLifecycle,
    cleanup: CleanupHandler,
    mastering: MasteringStage,
    eq: EqStage,
}

impl Pipeline {
    /// Opens the database and storage disk a loaded config names and wires a
    /// production pipeline over them. `database_path` wins over the config's.
    pub fn open(config: &Config, database_path: Option<PathBuf>) -> crate::Result<Self> {
        let db_path = database_path
            .or_else(|| config.database_path.clone())
            .or_else(default_database_path)
            .ok_or_else(|| ConfigError::Validation {
                message: "no database_path configured and no home directory".to_string(),
            })?;
        let database = Database::open(&db_path)?;

        Ok(Self::from_config(
            Arc::new(PipelineConfig::from_config(config)),
            Arc::new(database),
            Arc::new(LocalDisk::new(&config.storage_root)),
        ))
    }

    /// Production constructor: real subprocesses and the ffmpeg EQ engine.
    pub fn from_config(
        config: Arc<PipelineConfig>,
        store: Arc<dyn AudioFileStore>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let runner: Arc<dyn Runner> = Arc::new(TokioRunner::new());
        let engine: Arc<dyn EqEngine> = Arc::new(FfmpegEqEngine::new(
            runner.clone(),
            &config.ffmpeg_path,
            Duration::from_secs(config.eq_timeout_seconds),
        ));
        Self::new(config, store, storage, runner, engine)
    }

    /// Inject the subprocess runner and EQ engine.
    pub fn new(
        config: Arc<PipelineConfig>,
        store: Arc<dyn AudioFileStore>,
        storage: Arc<dyn Storage>,
        runner: Arc<dyn Runner>,
        engine: Arc<dyn EqEngine>,
    ) -> Self {
        let lifecycle = FileLifecycle::new(
            storage.clone(),
            &config.output_directory,
            &config.temp_directory,
            config.output_format.clone(),
        );
        let cleanup = CleanupHandler::new(storage);
        let mastering = MasteringStage::new(runner, config.mastering_settings());
        let eq = EqStage::new(
            engine,
            config.eq_enabled,
            config.min_gain_db,
            config.max_gain_db,
        );

        Self {
            config,
            store,
            lifecycle,
            cleanup,
            mastering,
            eq,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one fresh attempt for an audio file to a terminal status.
    ///
    /// An already completed file is left untouched and reported as skipped.
    /// On any error after the file entered `processing`, the file is marked
    /// `failed` and every artifact of the attempt is removed before the
    /// error is returned. A file another attempt has already completed is
    /// never moved back to `failed`, and its outputs are kept.
    pub async fn process(
        &self,
        audio_file_id: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<JobResult, PipelineError> {
        let file = self
            .store
            .find_audio_file(audio_file_id)?
            .ok_or_else(|| PipelineError::AudioFileNotFound(audio_file_id.to_string()))?;

        if file.status == AudioStatus::Completed {
            info!(
                audio_file_id = %file.id,
                "Audio file already completed, nothing to do"
            );
            return Ok(skipped(file));
        }

        let eq_settings = match file.preset_id.as_deref() {
            Some(preset_id) => self.store.find_preset_eq_settings(preset_id)?,
            None => None,
        };

        let storage = self.lifecycle.storage();
        let job = Job::new(
            file.id.clone(),
            storage.path(Path::new(&file.original_path)),
            self.lifecycle.output_root(),
            self.lifecycle.temp_root(),
            eq_settings,
        );

        let span = info_span!("pipeline",
            job_id = %job.id,
            audio_file_id = %job.audio_file_id,
            filename = %sanitize::redact_path(&job.input_path),
            input_hash = %sanitize::hash_path(&job.input_path),
        );
        self.run(file, job, progress).instrument(span).await
    }

    async fn run(
        &self,
        file: AudioFile,
        job: Job,
        progress: &dyn ProgressReporter,
    ) -> Result<JobResult, PipelineError> {
        progress.report(ProgressEvent::Started {
            job_id: job.id.clone(),
        });

        // Step 1: Precondition. Nothing has been written yet.
        {
            let _step = info_span!("validate_input").entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Validating,
                message: "Checking input file...".to_string(),
            });
            if let Err(e) = self.step_validate_input(&file, &job) {
                warn!("Input precondition failed: {}", e);
                self.record_failure(&file.id, &job.id, &e);
                progress.report(ProgressEvent::Failed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        }

        // Step 2: Enter processing
        {
            let _step = info_span!("begin_processing").entered();
            if let Err(e) = self.step_begin_processing(&file) {
                if let PipelineError::InvalidTransition {
                    from: AudioStatus::Completed,
                    ..
                } = e
                {
                    info!("Audio file completed by another attempt, nothing to do");
                    let current = self
                        .store
                        .find_audio_file(&file.id)?
                        .ok_or_else(|| PipelineError::AudioFileNotFound(file.id.clone()))?;
                    return Ok(skipped(current));
                }
                progress.report(ProgressEvent::Failed {
                    error: e.to_string(),
                });
                return Err(e);
            }
        }

        let paths = self.lifecycle.paths_for(&job);
        let mut ctx = PipelineContext::new(job, paths);

        match self.run_stages(&mut ctx, &file, progress).await {
            Ok(result) => {
                if let Some(ref mastered) = result.mastered_path {
                    progress.report(ProgressEvent::Completed {
                        mastered_path: mastered.clone(),
                        ai_only_path: result.ai_only_path.clone(),
                    });
                }
                info!(
                    eq_applied = result.eq_applied,
                    ai_mastering_applied = result.ai_mastering_applied,
                    elapsed_ms = ctx.started.elapsed().as_millis() as u64,
                    "Job completed"
                );
                Ok(result)
            }
            Err(e) => {
                error!(class = e.class(), "Job failed: {}", e);
                // A rejected status write means another attempt already
                // finished the file; its record stands.
                let finished_by = match e {
                    PipelineError::InvalidTransition { from, .. } => Some(from),
                    _ => self.record_failure(&file.id, &ctx.job.id, &e),
                };
                self.cleanup_after_failure(&ctx, finished_by);
                progress.report(ProgressEvent::Failed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Steps 3-7. Any error returned here leaves cleanup to the caller.
    async fn run_stages(
        &self,
        ctx: &mut PipelineContext,
        file: &AudioFile,
        progress: &dyn ProgressReporter,
    ) -> Result<JobResult, PipelineError> {
        // Step 3: Prepare directories
        {
            let _step = info_span!("prepare_directories").entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Preparing,
                message: "Preparing output directories...".to_string(),
            });
            self.lifecycle.prepare_directories(&ctx.job)?;
            // A redelivery means an earlier attempt died without cleaning up.
            if file.status == AudioStatus::Processing {
                self.cleanup
                    .sweep_stale(&self.config.temp_directory, self.config.stale_temp_after());
            }
        }

        // Step 4: Stage 1
        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Mastering,
            message: "Running AI mastering...".to_string(),
        });
        let mastering = self
            .step_master(ctx)
            .instrument(info_span!("ai_mastering"))
            .await?;

        // Step 5: Stage 2
        progress.report(ProgressEvent::Phase {
            phase: JobPhase::Enhancing,
            message: "Applying EQ enhancement...".to_string(),
        });
        let eq = self
            .step_enhance(ctx, &mastering)
            .instrument(info_span!("eq_enhancement"))
            .await;

        // Step 6: Finalize
        {
            let _step = info_span!("finalize").entered();
            progress.report(ProgressEvent::Phase {
                phase: JobPhase::Finalizing,
                message: "Moving outputs into place...".to_string(),
            });
            self.step_finalize(ctx, &mastering, &eq)?;
        }

        // Step 7: Persist
        let _step = info_span!("persist").entered();
        self.step_complete(ctx, file, &mastering, &eq)
    }

    fn step_validate_input(&self, file: &AudioFile, job: &Job) -> Result<(), PipelineError> {
        if !self
            .lifecycle
            .storage()
            .exists(Path::new(&file.original_path))
        {
            return Err(PipelineError::InputMissing(file.filename.clone()));
        }
        std::fs::File::open(&job.input_path).map_err(|e| PipelineError::InputUnreadable {
            path: file.filename.clone(),
            source: e,
        })?;
        Ok(())
    }

    /// The store checks the move against the row as it is now, not against
    /// the snapshot this attempt started from.
    fn step_begin_processing(&self, file: &AudioFile) -> Result<(), PipelineError> {
        if file.status == AudioStatus::Processing {
            warn!("Audio file already processing, treating as redelivery");
        }

        // A resubmitted file starts from the same state as a first upload.
        let update = AudioFileUpdate::new()
            .status(AudioStatus::Processing)
            .error_message(None)
            .mastered_path(None)
            .ai_only_path(None);
        self.store.update_audio_file(&file.id, &update)?;
        Ok(())
    }

    async fn step_master(
        &self,
        ctx: &mut PipelineContext,
    ) -> Result<MasteringOutcome, PipelineError> {
        let started = Instant::now();
        let outcome = self
            .mastering
            .run(&ctx.job.input_path, &ctx.paths.stage1_temp)
            .await?;
        ctx.mastering_elapsed = started.elapsed();

        if outcome.passthrough == Some(PassthroughReason::ToolUnavailable) {
            ctx.warnings.push(PipelineWarning::MasteringSkipped {
                reason: PassthroughReason::ToolUnavailable.as_str(),
            });
        }
        Ok(outcome)
    }

    async fn step_enhance(
        &self,
        ctx: &mut PipelineContext,
        mastering: &MasteringOutcome,
    ) -> EqOutcome {
        let started = Instant::now();
        let outcome = self
            .eq
            .run(
                &mastering.output,
                ctx.job.eq_settings.as_ref(),
                &ctx.paths.eq_temp,
            )
            .await;
        ctx.eq_elapsed = started.elapsed();

        if let EqOutcome::Degraded { ref error } = outcome {
            ctx.warnings.push(PipelineWarning::EqDegraded {
                error: error.clone(),
            });
        }
        outcome
    }

    fn step_finalize(
        &self,
        ctx: &mut PipelineContext,
        mastering: &MasteringOutcome,
        eq: &EqOutcome,
    ) -> Result<(), PipelineError> {
        let carried = eq.final_path(&mastering.output);
        ctx.written.push(ctx.paths.mastered.clone());
        self.lifecycle
            .finalize(carried, &ctx.paths.mastered)
            .map_err(PipelineError::Finalize)?;
        ctx.mastered = Some(ctx.paths.mastered.clone());

        // Only a real EQ pass makes the Stage 1 file a distinct artifact.
        if eq.applied() && self.config.keep_ai_only_version {
            ctx.written.push(ctx.paths.ai_only.clone());
            self.lifecycle
                .finalize(&mastering.output, &ctx.paths.ai_only)
                .map_err(PipelineError::Finalize)?;
            ctx.ai_only = Some(ctx.paths.ai_only.clone());
        }

        let report = self.cleanup.cleanup_temp(&ctx.paths);
        for (path, error) in report.failed {
            ctx.warnings
                .push(PipelineWarning::CleanupIncomplete { path, error });
        }
        Ok(())
    }

    fn step_complete(
        &self,
        ctx: &PipelineContext,
        file: &AudioFile,
        mastering: &MasteringOutcome,
        eq: &EqOutcome,
    ) -> Result<JobResult, PipelineError> {
        let storage = self.lifecycle.storage();
        let mastered = ctx
            .mastered
            .as_ref()
            .unwrap_or(&ctx.paths.mastered);

        let mut metadata = Map::new();
        metadata.insert("job_id".into(), json!(ctx.job.id));
        metadata.insert("processed_at".into(), json!(chrono::Utc::now().to_rfc3339()));
        metadata.insert("input_format".into(), json!(ctx.job.input_format()));
        metadata.insert(
            "output_format".into(),
            json!(self.lifecycle.output_extension(&ctx.job.input_path)),
        );
        metadata.insert(
            "original_size_bytes".into(),
            json!(storage.size(Path::new(&file.original_path)).ok()),
        );
        metadata.insert(
            "mastered_size_bytes".into(),
            json!(storage.size(&mastered.relative)?),
        );
        if let Some(ref ai_only) = ctx.ai_only {
            metadata.insert(
                "ai_only_size_bytes".into(),
                json!(storage.size(&ai_only.relative)?),
            );
        }
        metadata.insert(
            "ai_mastering_applied".into(),
            json!(mastering.tool_applied()),
        );
        if let Some(reason) = mastering.passthrough {
            metadata.insert("ai_mastering_skipped_reason".into(), json!(reason.as_str()));
        }
        metadata.insert("target_loudness".into(), json!(self.config.target_loudness));
        metadata.insert(
            "ai_mastering_time_seconds".into(),
            json!(seconds(ctx.mastering_elapsed)),
        );
        metadata.insert(
            "eq_processing_time_seconds".into(),
            json!(seconds(ctx.eq_elapsed)),
        );
        metadata.insert(
            "total_processing_time_seconds".into(),
            json!(seconds(ctx.started.elapsed())),
        );
        metadata.insert("eq_applied".into(), json!(eq.applied()));
        match eq {
            EqOutcome::Applied { settings, .. } => {
                metadata.insert(
                    "eq_settings".into(),
                    serde_json::to_value(settings).unwrap_or(Value::Null),
                );
            }
            EqOutcome::Degraded { error } => {
                metadata.insert("eq_warning".into(), json!(error));
            }
            EqOutcome::Skipped(reason) => {
                metadata.insert("eq_skipped_reason".into(), json!(reason.as_str()));
            }
        }

        let mastered_path = mastered.to_persisted();
        let ai_only_path = ctx.ai_only.as_ref().map(|p| p.to_persisted());

        let update = AudioFileUpdate::new()
            .status(AudioStatus::Completed)
            .mastered_path(Some(mastered_path.clone()))
            .ai_only_path(ai_only_path.clone())
            .error_message(None)
            .merge_metadata(metadata);
        self.store.update_audio_file(&file.id, &update)?;

        Ok(JobResult::completed(
            &ctx.job,
            mastered_path,
            ai_only_path,
            mastering.tool_applied(),
            eq.applied(),
            ctx.warnings.iter().map(|w| w.to_string()).collect(),
        ))
    }

    /// Marks the file failed. A write failure here is logged; the original
    /// error is what the caller sees. Returns the status that blocked the
    /// write when another attempt has already finished the file.
    fn record_failure(
        &self,
        audio_file_id: &str,
        job_id: &str,
        err: &PipelineError,
    ) -> Option<AudioStatus> {
        let mut last_failure = Map::new();
        last_failure.insert("message".into(), json!(err.to_string()));
        last_failure.insert("class".into(), json!(err.class()));
        last_failure.insert("job_id".into(), json!(job_id));
        last_failure.insert("failed_at".into(), json!(chrono::Utc::now().to_rfc3339()));
        let mut metadata = Map::new();
        metadata.insert("last_failure".into(), Value::Object(last_failure));

        let update = AudioFileUpdate::new()
            .status(AudioStatus::Failed)
            .error_message(Some(err.to_string()))
            .mastered_path(None)
            .ai_only_path(None)
            .merge_metadata(metadata);

        match self.store.update_audio_file(audio_file_id, &update) {
            Ok(()) => None,
            Err(DatabaseError::InvalidTransition { from, .. }) => {
                warn!(status = %from, "Audio file finished by another attempt, failure not recorded");
                Some(from)
            }
            Err(e) => {
                error!("Failed to record failure for {}: {}", audio_file_id, e);
                None
            }
        }
    }

    /// Temp files always go. Canonical outputs this attempt wrote go too,
    /// unless a completed record now points at them.
    fn cleanup_after_failure(&self, ctx: &PipelineContext, finished_by: Option<AudioStatus>) {
        let _step = info_span!("cleanup").entered();
        let written: &[StoredPath] = if finished_by == Some(AudioStatus::Completed) {
            &[]
        } else {
            &ctx.written
        };
        let report = self.cleanup.cleanup_all(&ctx.paths, written);
        if !report.is_clean() {
            warn!(
                failed = report.failed.len(),
                "Cleanup left artifacts behind"
            );
        }
    }
}

fn skipped(file: AudioFile) -> JobResult {
    JobResult::already_completed(
        uuid::Uuid::new_v4().to_string(),
        file.id,
        file.mastered_path,
        file.ai_only_path,
    )
}

fn seconds(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}
