use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::db::{AudioStatus, DatabaseError};
use crate::error::{StageError, StorageError};

/// Fatal job errors. The `Display` text is what lands in `error_message`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input file does not exist: {0}")]
    InputMissing(String),

    #[error("Input file is not readable: {path}: {source}")]
    InputUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Finalization failed: {0}")]
    Finalize(#[source] StorageError),

    #[error("Database error: {0}")]
    Database(#[source] DatabaseError),

    #[error("Audio file not found: {0}")]
    AudioFileNotFound(String),

    #[error("Audio file {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: AudioStatus,
        to: AudioStatus,
    },
}

impl PipelineError {
    /// Short failure class persisted alongside the message.
    pub fn class(&self) -> &'static str {
        match self {
            PipelineError::InputMissing(_) | PipelineError::InputUnreadable { .. } => {
                "precondition"
            }
            PipelineError::Stage(_) => "mastering",
            PipelineError::Storage(_) => "storage",
            PipelineError::Finalize(_) => "finalization",
            PipelineError::Database(_) => "persistence",
            PipelineError::AudioFileNotFound(_) => "not_found",
            PipelineError::InvalidTransition { .. } => "invalid_state",
        }
    }
}

impl From<DatabaseError> for PipelineError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::InvalidTransition { id, from, to } => {
                PipelineError::InvalidTransition { id, from, to }
            }
            other => PipelineError::Database(other),
        }
    }
}

/// Non-fatal problems collected during a run.
#[derive(Debug, Clone)]
pub enum PipelineWarning {
    MasteringSkipped { reason: &'static str },
    EqDegraded { error: String },
    CleanupIncomplete { path: PathBuf, error: String },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineWarning::MasteringSkipped { reason } => {
                write!(f, "AI mastering skipped ({}), input passed through", reason)
            }
            PipelineWarning::EqDegraded { error } => {
                write!(f, "EQ enhancement failed, using AI-mastered output: {}", error)
            }
            PipelineWarning::CleanupIncomplete { path, error } => {
                write!(f, "Could not remove {}: {}", path.display(), error)
            }
        }
    }
}
