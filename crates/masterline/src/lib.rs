pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod process;
pub mod sanitize;
pub mod stages;
pub mod storage;
pub mod worker;

pub use config::{load_config, Config};
pub use db::{AudioFile, AudioFileStore, AudioFileUpdate, AudioStatus, Database, DatabaseError};
pub use error::{ConfigError, MasterlineError, Result, StageError, StorageError, WorkerError};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext, PipelineError};
pub use worker::{Job, JobReport, JobResult, WorkerPool};
