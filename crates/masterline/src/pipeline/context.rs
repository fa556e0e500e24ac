use std::time::{Duration, Instant};

use crate::storage::{JobPaths, StoredPath};
use crate::worker::job::Job;

use super::error::PipelineWarning;

/// State of one job attempt once it has reached `processing`.
pub struct PipelineContext {
    pub job: Job,
    pub paths: JobPaths,
    pub started: Instant,

    pub mastering_elapsed: Duration,
    pub eq_elapsed: Duration,

    // Set by finalization
    pub mastered: Option<StoredPath>,
    pub ai_only: Option<StoredPath>,
    /// Canonical paths this attempt started writing, finished or not.
    pub written: Vec<StoredPath>,

    // Non-fatal warnings
    pub warnings: Vec<PipelineWarning>,
}

impl PipelineContext {
    pub fn new(job: Job, paths: JobPaths) -> Self {
        Self {
            job,
            paths,
            started: Instant::now(),
            mastering_elapsed: Duration::ZERO,
            eq_elapsed: Duration::ZERO,
            mastered: None,
            ai_only: None,
            written: Vec::new(),
            warnings: Vec::new(),
        }
    }
}
