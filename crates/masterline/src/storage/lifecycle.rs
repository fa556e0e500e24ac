//! Path computation and temp-to-final moves for mastering jobs.
//!
//! Temp artifacts are keyed by the per-attempt job id, canonical outputs by
//! the audio file id. A retried job gets a fresh id, so concurrent attempts
//! never share temp names.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::StorageError;
use crate::sanitize;
use crate::worker::job::Job;

use super::disk::Storage;

const FALLBACK_EXTENSION: &str = "wav";

/// Name suffixes of the per-attempt temp files: `{job_id}_{suffix}.{ext}`.
pub const STAGE1_SUFFIX: &str = "ai_mastered";
pub const EQ_SUFFIX: &str = "eq_enhanced";

/// A path known both relative to the storage disk (what gets persisted) and
/// resolved on the local filesystem (what gets opened).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPath {
    pub relative: PathBuf,
    pub absolute: PathBuf,
}

impl StoredPath {
    /// The persisted form of this path.
    pub fn to_persisted(&self) -> String {
        self.relative.to_string_lossy().into_owned()
    }
}

/// Every file a single job attempt may create.
#[derive(Debug, Clone)]
pub struct JobPaths {
    /// Stage 1 output.
    pub stage1_temp: StoredPath,
    /// Stage 2 output.
    pub eq_temp: StoredPath,
    /// Canonical mastered output.
    pub mastered: StoredPath,
    /// Canonical AI-only output (Stage 1 alone, retained when EQ applied).
    pub ai_only: StoredPath,
}

impl JobPaths {
    pub fn temp_artifacts(&self) -> [&StoredPath; 2] {
        [&self.stage1_temp, &self.eq_temp]
    }
}

pub struct FileLifecycle {
    storage: Arc<dyn Storage>,
    output_directory: PathBuf,
    temp_directory: PathBuf,
    output_format: Option<String>,
}

impl FileLifecycle {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        storage: Arc<dyn Storage>,
        output_directory: P,
        temp_directory: Q,
        output_format: Option<String>,
    ) -> Self {
        Self {
            storage,
            output_directory: output_directory.as_ref().to_path_buf(),
            temp_directory: temp_directory.as_ref().to_path_buf(),
            output_format: output_format
                .map(|f| f.trim_start_matches('.').to_ascii_lowercase())
                .filter(|f| !f.is_empty()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn output_root(&self) -> PathBuf {
        self.storage.path(&self.output_directory)
    }

    pub fn temp_root(&self) -> PathBuf {
        self.storage.path(&self.temp_directory)
    }

    /// Creates the job's output and temp directories if needed and checks
    /// that both accept new files. Safe to call repeatedly.
    pub fn prepare_directories(&self, job: &Job) -> Result<(), StorageError> {
        ensure_writable_directory(&job.output_directory)?;
        ensure_writable_directory(&job.temp_directory)?;
        Ok(())
    }

    /// Extension used for every file this job writes: the configured output
    /// format, else the input's own extension.
    pub fn output_extension(&self, input_path: &Path) -> String {
        if let Some(ref format) = self.output_format {
            return format.clone();
        }
        input_path
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
    }

    /// Deterministic paths for a job. Same job id, same paths.
    pub fn paths_for(&self, job: &Job) -> JobPaths {
        let ext = self.output_extension(&job.input_path);
        let temp = |suffix: &str| {
            let name = format!("{}_{}.{}", job.id, suffix, ext);
            StoredPath {
                relative: self.temp_directory.join(&name),
                absolute: job.temp_directory.join(&name),
            }
        };
        let output = |suffix: &str| {
            let name = format!("{}_{}.{}", job.audio_file_id, suffix, ext);
            StoredPath {
                relative: self.output_directory.join(&name),
                absolute: job.output_directory.join(&name),
            }
        };

        JobPaths {
            stage1_temp: temp(STAGE1_SUFFIX),
            eq_temp: temp(EQ_SUFFIX),
            mastered: output("mastered"),
            ai_only: output("ai_only"),
        }
    }

    /// Copies `from` to its canonical location `to`, then deletes `from`.
    /// When both name the same file nothing is copied or deleted.
    pub fn finalize(&self, from: &StoredPath, to: &StoredPath) -> Result<(), StorageError> {
        if same_file(&from.absolute, &to.absolute) {
            debug!(
                file = %sanitize::redact_path(&to.absolute),
                "Finalize source is the destination, leaving in place"
            );
            return Ok(());
        }

        std::fs::copy(&from.absolute, &to.absolute).map_err(|e| StorageError::CopyFile {
            from: from.absolute.clone(),
            to: to.absolute.clone(),
            source: e,
        })?;

        std::fs::remove_file(&from.absolute).map_err(|e| StorageError::DeleteFile {
            path: from.absolute.clone(),
            source: e,
        })?;

        debug!(
            from = %sanitize::redact_path(&from.absolute),
            to = %sanitize::redact_path(&to.absolute),
            "Finalized"
        );
        Ok(())
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn ensure_writable_directory(path: &Path) -> Result<(), StorageError> {
    if !path.is_dir() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    // The directory must accept new files, not just exist.
    let probe = path.join(format!(".write-probe-{}", uuid::Uuid::new_v4()));
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&probe)
        .map_err(|e| StorageError::NotWritable {
            path: path.to_path_buf(),
            source: e,
        })?;
    if let Err(e) = std::fs::remove_file(&probe) {
        debug!("Failed to remove write probe: {}", e);
    }

    Ok(())
}
