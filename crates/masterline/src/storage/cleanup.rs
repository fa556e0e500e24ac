use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::sanitize;

use super::disk::Storage;
use super::lifecycle::{JobPaths, StoredPath, EQ_SUFFIX, STAGE1_SUFFIX};

/// What a cleanup pass did. Failures are recorded, never returned as errors.
#[derive(Debug, Default)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Removes the well-known artifacts of a job attempt.
///
/// Never fails: it runs on error paths and must not mask the error that
/// triggered it.
#[derive(Clone)]
pub struct CleanupHandler {
    storage: Arc<dyn Storage>,
}

impl CleanupHandler {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Failure path: temp files plus the canonical outputs this attempt
    /// wrote, complete or partial. Canonical names are shared by every
    /// attempt on the same audio file, so nothing else is touched.
    pub fn cleanup_all(&self, paths: &JobPaths, written: &[StoredPath]) -> CleanupReport {
        self.remove(paths.temp_artifacts().into_iter().chain(written))
    }

    /// Success path: temp files only. Finalized outputs stay.
    pub fn cleanup_temp(&self, paths: &JobPaths) -> CleanupReport {
        self.remove(paths.temp_artifacts())
    }

    /// Removes stage temp files under `temp_directory` that have not been
    /// touched for `older_than`. An attempt that died mid-job leaves these
    /// under a job id nothing records.
    pub fn sweep_stale(&self, temp_directory: &Path, older_than: Duration) -> CleanupReport {
        let absolute = self.storage.path(temp_directory);
        let entries = match std::fs::read_dir(&absolute) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Temp directory not readable, nothing to sweep: {}", e);
                return CleanupReport::default();
            }
        };

        let stale: Vec<StoredPath> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| is_stage_temp(&entry.path()))
            .filter(|entry| {
                entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| modified.elapsed().ok())
                    .is_some_and(|age| age >= older_than)
            })
            .map(|entry| StoredPath {
                relative: temp_directory.join(entry.file_name()),
                absolute: entry.path(),
            })
            .collect();

        let report = self.remove(&stale);
        if !report.removed.is_empty() {
            warn!(
                removed = report.removed.len(),
                "Swept temp files left by earlier attempts"
            );
        }
        report
    }

    fn remove<'a, I>(&self, artifacts: I) -> CleanupReport
    where
        I: IntoIterator<Item = &'a StoredPath>,
    {
        let mut report = CleanupReport::default();

        for artifact in artifacts {
            match self.storage.delete(&artifact.relative) {
                Ok(true) => {
                    debug!(
                        file = %sanitize::redact_path(&artifact.absolute),
                        "Removed job artifact"
                    );
                    report.removed.push(artifact.absolute.clone());
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        file = %sanitize::redact_path(&artifact.absolute),
                        "Failed to remove job artifact: {}",
                        e
                    );
                    report.failed.push((artifact.absolute.clone(), e.to_string()));
                }
            }
        }

        report
    }
}

fn is_stage_temp(path: &Path) -> bool {
    path.is_file()
        && path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| {
                [STAGE1_SUFFIX, EQ_SUFFIX]
                    .iter()
                    .any(|suffix| stem.ends_with(&format!("_{}", suffix)))
            })
}
