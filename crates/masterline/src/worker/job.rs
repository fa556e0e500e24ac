use std::path::{Path, PathBuf};

use crate::db::AudioStatus;
use crate::stages::eq::EqSettings;

/// One processing attempt for an audio file.
///
/// The id is generated fresh on every construction and namespaces the
/// attempt's temp files, so a redelivered job never reuses the id of an
/// attempt that may still be running.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub audio_file_id: String,
    /// Absolute path to the uploaded original.
    pub input_path: PathBuf,
    pub output_directory: PathBuf,
    pub temp_directory: PathBuf,
    /// EQ settings resolved from the audio file's preset, if any.
    pub eq_settings: Option<EqSettings>,
}

impl Job {
    pub fn new(
        audio_file_id: String,
        input_path: PathBuf,
        output_directory: PathBuf,
        temp_directory: PathBuf,
        eq_settings: Option<EqSettings>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            audio_file_id,
            input_path,
            output_directory,
            temp_directory,
            eq_settings,
        }
    }

    /// MIME type of the input, detected from its extension.
    pub fn input_format(&self) -> Option<String> {
        detect_mime_type(&self.input_path)
    }
}

fn detect_mime_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.to_string())
}

/// Terminal outcome of a successful `Pipeline::process` call.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub audio_file_id: String,
    pub status: AudioStatus,
    pub mastered_path: Option<String>,
    pub ai_only_path: Option<String>,
    pub ai_mastering_applied: bool,
    pub eq_applied: bool,
    /// Non-fatal problems, e.g. a degraded EQ stage.
    pub warnings: Vec<String>,
    /// True when the file was already completed and nothing ran.
    pub skipped: bool,
}

impl JobResult {
    pub fn completed(
        job: &Job,
        mastered_path: String,
        ai_only_path: Option<String>,
        ai_mastering_applied: bool,
        eq_applied: bool,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            job_id: job.id.clone(),
            audio_file_id: job.audio_file_id.clone(),
            status: AudioStatus::Completed,
            mastered_path: Some(mastered_path),
            ai_only_path,
            ai_mastering_applied,
            eq_applied,
            warnings,
            skipped: false,
        }
    }

    pub fn already_completed(
        job_id: String,
        audio_file_id: String,
        mastered_path: Option<String>,
        ai_only_path: Option<String>,
    ) -> Self {
        Self {
            job_id,
            audio_file_id,
            status: AudioStatus::Completed,
            mastered_path,
            ai_only_path,
            ai_mastering_applied: false,
            eq_applied: false,
            warnings: vec![],
            skipped: true,
        }
    }
}
