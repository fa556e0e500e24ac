use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Root of the storage disk. Every persisted path is relative to it.
    pub storage_root: PathBuf,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default = "default_temp_directory")]
    pub temp_directory: PathBuf,
    /// Extension for stage outputs. `None` keeps the input's extension.
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub mastering: MasteringConfig,
    #[serde(default)]
    pub eq: EqConfig,
}

impl Config {
    /// `dir` resolved against the storage root. Absolute paths pass through.
    pub fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.storage_root.join(dir)
        }
    }
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("mastered")
}

fn default_temp_directory() -> PathBuf {
    PathBuf::from("temp")
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteringConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tool_path")]
    pub tool_path: PathBuf,
    #[serde(default = "default_target_loudness")]
    pub target_loudness: f64,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_probe_timeout_seconds")]
    pub probe_timeout_seconds: u64,
}

fn default_tool_path() -> PathBuf {
    PathBuf::from("ai-mastering")
}

fn default_target_loudness() -> f64 {
    -14.0
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_probe_timeout_seconds() -> u64 {
    10
}

impl Default for MasteringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tool_path: default_tool_path(),
            target_loudness: default_target_loudness(),
            timeout_seconds: default_timeout_seconds(),
            probe_timeout_seconds: default_probe_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EqConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub keep_ai_only_version: bool,
    #[serde(default = "default_min_gain_db")]
    pub min_gain_db: f64,
    #[serde(default = "default_max_gain_db")]
    pub max_gain_db: f64,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_min_gain_db() -> f64 {
    -18.0
}

fn default_max_gain_db() -> f64 {
    18.0
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for EqConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keep_ai_only_version: true,
            min_gain_db: default_min_gain_db(),
            max_gain_db: default_max_gain_db(),
            ffmpeg_path: default_ffmpeg_path(),
            timeout_seconds: default_timeout_seconds(),
        }
    }
}
