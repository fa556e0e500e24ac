//! The narrow persistence surface the pipeline depends on.

use super::{audio_file_repo, preset_repo, AudioFile, AudioFileUpdate, Database, DatabaseError};
use crate::stages::eq::EqSettings;

/// Record store for audio files. Implemented by [`Database`]; tests swap
/// in their own.
pub trait AudioFileStore: Send + Sync {
    fn find_audio_file(&self, id: &str) -> Result<Option<AudioFile>, DatabaseError>;

    /// EQ settings of a preset. `Ok(None)` when the preset is gone or has
    /// no EQ curve.
    fn find_preset_eq_settings(&self, preset_id: &str) -> Result<Option<EqSettings>, DatabaseError>;

    fn update_audio_file(&self, id: &str, update: &AudioFileUpdate) -> Result<(), DatabaseError>;
}

impl AudioFileStore for Database {
    fn find_audio_file(&self, id: &str) -> Result<Option<AudioFile>, DatabaseError> {
        audio_file_repo::find_by_id(self, id)
    }

    fn find_preset_eq_settings(&self, preset_id: &str) -> Result<Option<EqSettings>, DatabaseError> {
        Ok(preset_repo::find_by_id(self, preset_id)?.and_then(|p| p.eq_settings))
    }

    fn update_audio_file(&self, id: &str, update: &AudioFileUpdate) -> Result<(), DatabaseError> {
        audio_file_repo::update(self, id, update)
    }
}
