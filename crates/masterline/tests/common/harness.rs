//! Isolated environment for driving the pipeline end to end.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use tempfile::TempDir;

use masterline::db::{audio_file_repo, preset_repo, Preset};
use masterline::pipeline::{NoopProgress, PipelineConfig, PipelineError};
use masterline::stages::EqSettings;
use masterline::storage::LocalDisk;
use masterline::{AudioFile, AudioStatus, Database, JobResult, Pipeline};

use super::fakes::{EqBehavior, FakeEqEngine, FakeMasteringTool, ToolBehavior};

pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub config: PipelineConfig,
    pub tool: Arc<FakeMasteringTool>,
    pub eq: Arc<FakeEqEngine>,
}

impl TestHarness {
    /// Tool succeeds, EQ engine succeeds, EQ globally enabled.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
            db: Database::open_in_memory().expect("Failed to open database"),
            config: PipelineConfig::default(),
            tool: Arc::new(FakeMasteringTool::new(ToolBehavior::Succeeds)),
            eq: Arc::new(FakeEqEngine::new(EqBehavior::Succeeds)),
        }
    }

    pub fn with_tool(mut self, behavior: ToolBehavior) -> Self {
        self.tool = Arc::new(FakeMasteringTool::new(behavior));
        self
    }

    pub fn with_eq(mut self, behavior: EqBehavior) -> Self {
        self.eq = Arc::new(FakeEqEngine::new(behavior));
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut PipelineConfig)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// A pipeline over the harness' current collaborators.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            Arc::new(self.config.clone()),
            Arc::new(self.db.clone()),
            Arc::new(LocalDisk::new(self.root())),
            self.tool.clone(),
            self.eq.clone(),
        )
    }

    /// A second pipeline on the same database and disk, with its own tool.
    pub fn pipeline_with_tool(&self, tool: Arc<FakeMasteringTool>) -> Pipeline {
        Pipeline::new(
            Arc::new(self.config.clone()),
            Arc::new(self.db.clone()),
            Arc::new(LocalDisk::new(self.root())),
            tool,
            self.eq.clone(),
        )
    }

    pub async fn process(&self, audio_file_id: &str) -> Result<JobResult, PipelineError> {
        self.pipeline().process(audio_file_id, &NoopProgress).await
    }

    /// Writes `uploads/<filename>` and inserts an `uploaded` record for it.
    pub fn upload(&self, id: &str, filename: &str, content: &[u8]) -> AudioFile {
        let relative = format!("uploads/{}", filename);
        let path = self.root().join(&relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).expect("Failed to write upload");

        let file = AudioFile::new_uploaded(id, filename, &relative);
        audio_file_repo::insert(&self.db, &file).expect("Failed to insert audio file");
        file
    }

    /// Like `upload`, with a preset carrying `settings`.
    pub fn upload_with_eq(
        &self,
        id: &str,
        filename: &str,
        content: &[u8],
        settings: EqSettings,
    ) -> AudioFile {
        let preset_id = format!("preset-{}", id);
        preset_repo::insert(&self.db, &Preset::new(&preset_id, "Test preset", Some(settings)))
            .expect("Failed to insert preset");

        let relative = format!("uploads/{}", filename);
        let path = self.root().join(&relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).expect("Failed to write upload");

        let mut file = AudioFile::new_uploaded(id, filename, &relative);
        file.preset_id = Some(preset_id);
        audio_file_repo::insert(&self.db, &file).expect("Failed to insert audio file");
        file
    }

    /// A record whose upload never reached the disk.
    pub fn upload_record_only(&self, id: &str, filename: &str) {
        let file = AudioFile::new_uploaded(id, filename, &format!("uploads/{}", filename));
        audio_file_repo::insert(&self.db, &file).expect("Failed to insert audio file");
    }

    pub fn record(&self, id: &str) -> AudioFile {
        audio_file_repo::find_by_id(&self.db, id)
            .expect("Failed to query audio file")
            .expect("Audio file missing")
    }

    pub fn status(&self, id: &str) -> AudioStatus {
        self.record(id).status
    }

    pub fn metadata(&self, id: &str) -> Map<String, Value> {
        self.record(id).metadata
    }

    pub fn read(&self, relative: &str) -> Vec<u8> {
        std::fs::read(self.root().join(relative)).expect("Failed to read file")
    }

    pub fn temp_files(&self) -> Vec<PathBuf> {
        list_files(&self.root().join(&self.config.temp_directory))
    }

    pub fn output_files(&self) -> Vec<PathBuf> {
        list_files(&self.root().join(&self.config.output_directory))
    }
}

fn list_files(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => {
            let mut files: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            files
        }
        Err(_) => Vec::new(),
    }
}
