use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::stages::MasteringSettings;

/// Explicit orchestrator configuration. Built once and shared by every job.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub ai_mastering_enabled: bool,
    pub tool_path: PathBuf,
    pub target_loudness: f64,
    pub timeout_seconds: u64,
    pub probe_timeout_seconds: u64,
    pub eq_enabled: bool,
    pub keep_ai_only_version: bool,
    pub min_gain_db: f64,
    pub max_gain_db: f64,
    pub ffmpeg_path: PathBuf,
    pub eq_timeout_seconds: u64,
    /// Relative to the storage disk.
    pub output_directory: PathBuf,
    /// Relative to the storage disk.
    pub temp_directory: PathBuf,
    pub output_format: Option<String>,
}

impl PipelineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ai_mastering_enabled: config.mastering.enabled,
            tool_path: config.mastering.tool_path.clone(),
            target_loudness: config.mastering.target_loudness,
            timeout_seconds: config.mastering.timeout_seconds,
            probe_timeout_seconds: config.mastering.probe_timeout_seconds,
            eq_enabled: config.eq.enabled,
            keep_ai_only_version: config.eq.keep_ai_only_version,
            min_gain_db: config.eq.min_gain_db,
            max_gain_db: config.eq.max_gain_db,
            ffmpeg_path: config.eq.ffmpeg_path.clone(),
            eq_timeout_seconds: config.eq.timeout_seconds,
            output_directory: config.output_directory.clone(),
            temp_directory: config.temp_directory.clone(),
            output_format: config.output_format.clone(),
        }
    }

    pub fn mastering_settings(&self) -> MasteringSettings {
        MasteringSettings {
            enabled: self.ai_mastering_enabled,
            tool_path: self.tool_path.clone(),
            target_loudness: self.target_loudness,
            timeout: Duration::from_secs(self.timeout_seconds),
            probe_timeout: Duration::from_secs(self.probe_timeout_seconds),
        }
    }

    /// Longest a live attempt can leave a temp file untouched: every
    /// subprocess it runs is bounded by one of these timeouts.
    pub fn stale_temp_after(&self) -> Duration {
        Duration::from_secs(
            self.probe_timeout_seconds + self.timeout_seconds + self.eq_timeout_seconds,
        )
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ai_mastering_enabled: true,
            tool_path: PathBuf::from("ai-mastering"),
            target_loudness: -14.0,
            timeout_seconds: 300,
            probe_timeout_seconds: 10,
            eq_enabled: true,
            keep_ai_only_version: true,
            min_gain_db: -18.0,
            max_gain_db: 18.0,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            eq_timeout_seconds: 300,
            output_directory: PathBuf::from("mastered"),
            temp_directory: PathBuf::from("temp"),
            output_format: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    #[test]
    fn test_from_config_flattens_sections() {
        let config = load_config_from_str(
            r#"{ "version": "1.0", "storage_root": "/srv",
                 "output_format": "mp3",
                 "mastering": { "enabled": false, "target_loudness": -9 },
                 "eq": { "keep_ai_only_version": false, "max_gain_db": 12 } }"#,
        )
        .unwrap();

        let pipeline = PipelineConfig::from_config(&config);
        assert!(!pipeline.ai_mastering_enabled);
        assert_eq!(pipeline.target_loudness, -9.0);
        assert!(pipeline.eq_enabled);
        assert!(!pipeline.keep_ai_only_version);
        assert_eq!(pipeline.max_gain_db, 12.0);
        assert_eq!(pipeline.output_format.as_deref(), Some("mp3"));

        let settings = pipeline.mastering_settings();
        assert_eq!(settings.timeout, Duration::from_secs(300));
        assert_eq!(settings.probe_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_stale_temp_after_covers_every_subprocess() {
        let config = PipelineConfig::default();
        assert_eq!(config.stale_temp_after(), Duration::from_secs(610));
    }
}
