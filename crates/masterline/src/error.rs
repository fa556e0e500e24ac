use std::path::PathBuf;
use thiserror::Error;

use crate::process::RunnerError;

#[derive(Error, Debug)]
pub enum MasterlineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stage error: {0}")]
    Stage(#[from] StageError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Stage 1 failures. Every variant is fatal to the job.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("AI mastering failed: {stderr}")]
    MasteringFailed { exit_code: Option<i32>, stderr: String },

    #[error("AI mastering timed out after {seconds}s")]
    MasteringTimedOut { seconds: u64 },

    #[error("AI mastering produced no output at '{path}'")]
    MasteringNoOutput { path: PathBuf },

    #[error("AI mastering could not be started: {0}")]
    Runner(#[source] RunnerError),

    #[error("Passthrough copy to '{path}' failed: {source}")]
    Passthrough {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Output directory is not writable: {path}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy file from '{from}' to '{to}': {source}")]
    CopyFile {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file '{path}': {source}")]
    DeleteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read metadata for '{path}': {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, MasterlineError>;
