//! Audio file repository — rows of the `audio_files` table.

use std::fmt;
use std::str::FromStr;

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::metadata;
use super::{Database, DatabaseError};

/// Processing status of an audio file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
}

impl AudioStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AudioStatus::Uploaded => "uploaded",
            AudioStatus::Processing => "processing",
            AudioStatus::Completed => "completed",
            AudioStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AudioStatus::Completed | AudioStatus::Failed)
    }

    /// Allowed moves. `processing → processing` covers a queue redelivery
    /// after a crashed attempt; `→ failed` from a non-processing state is a
    /// precondition failure.
    pub fn can_transition_to(&self, next: AudioStatus) -> bool {
        use AudioStatus::*;
        matches!(
            (self, next),
            (Uploaded, Processing)
                | (Failed, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Uploaded, Failed)
                | (Failed, Failed)
        )
    }
}

impl fmt::Display for AudioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AudioStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(AudioStatus::Uploaded),
            "processing" => Ok(AudioStatus::Processing),
            "completed" => Ok(AudioStatus::Completed),
            "failed" => Ok(AudioStatus::Failed),
            other => Err(DatabaseError::InvalidValue {
                column: "status",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AudioFile {
    pub id: String,
    pub filename: String,
    /// Path of the upload, relative to the storage disk.
    pub original_path: String,
    pub preset_id: Option<String>,
    pub status: AudioStatus,
    pub mastered_path: Option<String>,
    pub ai_only_path: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Map<String, Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl AudioFile {
    /// A freshly uploaded file, as the upload path would create it.
    pub fn new_uploaded(id: &str, filename: &str, original_path: &str) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: id.to_string(),
            filename: filename.to_string(),
            original_path: original_path.to_string(),
            preset_id: None,
            status: AudioStatus::Uploaded,
            mastered_path: None,
            ai_only_path: None,
            error_message: None,
            metadata: Map::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<(Self, String, String), rusqlite::Error> {
        let status: String = row.get("status")?;
        let metadata: String = row.get("metadata")?;
        Ok((
            Self {
                id: row.get("id")?,
                filename: row.get("filename")?,
                original_path: row.get("original_path")?,
                preset_id: row.get("preset_id")?,
                status: AudioStatus::Uploaded,
                mastered_path: row.get("mastered_path")?,
                ai_only_path: row.get("ai_only_path")?,
                error_message: row.get("error_message")?,
                metadata: Map::new(),
                created_at: row.get("created_at")?,
                updated_at: row.get("updated_at")?,
            },
            status,
            metadata,
        ))
    }
}

/// A partial update. Only fields that are `Some` are written; `metadata`
/// is merged into the stored object.
#[derive(Debug, Clone, Default)]
pub struct AudioFileUpdate {
    pub status: Option<AudioStatus>,
    pub mastered_path: Option<Option<String>>,
    pub ai_only_path: Option<Option<String>>,
    pub error_message: Option<Option<String>>,
    pub metadata: Option<Map<String, Value>>,
}

impl AudioFileUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: AudioStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn mastered_path(mut self, path: Option<String>) -> Self {
        self.mastered_path = Some(path);
        self
    }

    pub fn ai_only_path(mut self, path: Option<String>) -> Self {
        self.ai_only_path = Some(path);
        self
    }

    pub fn error_message(mut self, message: Option<String>) -> Self {
        self.error_message = Some(message);
        self
    }

    pub fn merge_metadata(mut self, patch: Map<String, Value>) -> Self {
        match self.metadata {
            Some(ref mut existing) => metadata::merge(existing, &patch),
            None => self.metadata = Some(patch),
        }
        self
    }
}

fn parse_metadata(raw: &str) -> Result<Map<String, Value>, DatabaseError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Ok(Map::new()),
        Ok(other) => Err(DatabaseError::InvalidValue {
            column: "metadata",
            value: other.to_string(),
        }),
        Err(e) => Err(DatabaseError::Json {
            column: "metadata",
            source: e,
        }),
    }
}

fn encode_metadata(map: &Map<String, Value>) -> Result<String, DatabaseError> {
    serde_json::to_string(map).map_err(|e| DatabaseError::Json {
        column: "metadata",
        source: e,
    })
}

/// Inserts a new audio file row.
pub fn insert(db: &Database, file: &AudioFile) -> Result<(), DatabaseError> {
    let metadata = encode_metadata(&file.metadata)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO audio_files (id, filename, original_path, preset_id, status,
             mastered_path, ai_only_path, error_message, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                file.id,
                file.filename,
                file.original_path,
                file.preset_id,
                file.status.as_str(),
                file.mastered_path,
                file.ai_only_path,
                file.error_message,
                metadata,
                file.created_at,
                file.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds an audio file by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<AudioFile>, DatabaseError> {
    let raw = db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM audio_files WHERE id = ?1",
                params![id],
                AudioFile::from_row,
            )
            .optional()?;
        Ok(row)
    })?;

    match raw {
        Some((mut file, status, metadata)) => {
            file.status = status.parse()?;
            file.metadata = parse_metadata(&metadata)?;
            Ok(Some(file))
        }
        None => Ok(None),
    }
}

/// Applies a partial update atomically. The stored metadata is read,
/// merged and written back inside one transaction.
///
/// A status change is checked against the stored status, and the write only
/// lands if that status is still current when the row is updated. Anything
/// else is an `InvalidTransition`.
pub fn update(db: &Database, id: &str, update: &AudioFileUpdate) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let stored: Option<(String, String)> = tx
            .query_row(
                "SELECT status, metadata FROM audio_files WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let (stored_status, stored_metadata) = stored.ok_or_else(|| DatabaseError::NotFound {
            table: "audio_files",
            id: id.to_string(),
        })?;
        let current: AudioStatus = stored_status.parse()?;

        let mut sets: Vec<&'static str> = Vec::new();
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(status) = update.status {
            if !current.can_transition_to(status) {
                return Err(DatabaseError::InvalidTransition {
                    id: id.to_string(),
                    from: current,
                    to: status,
                });
            }
            sets.push("status");
            values.push(Box::new(status.as_str()));
        }
        if let Some(ref path) = update.mastered_path {
            sets.push("mastered_path");
            values.push(Box::new(path.clone()));
        }
        if let Some(ref path) = update.ai_only_path {
            sets.push("ai_only_path");
            values.push(Box::new(path.clone()));
        }
        if let Some(ref message) = update.error_message {
            sets.push("error_message");
            values.push(Box::new(message.clone()));
        }
        if let Some(ref patch) = update.metadata {
            let mut merged = parse_metadata(&stored_metadata)?;
            metadata::merge(&mut merged, patch);
            sets.push("metadata");
            values.push(Box::new(encode_metadata(&merged)?));
        }
        sets.push("updated_at");
        values.push(Box::new(chrono::Utc::now().to_rfc3339()));

        let assignments: Vec<String> = sets
            .iter()
            .enumerate()
            .map(|(i, column)| format!("{} = ?{}", column, i + 1))
            .collect();
        values.push(Box::new(id.to_string()));
        let id_param = values.len();
        values.push(Box::new(current.as_str()));
        let sql = format!(
            "UPDATE audio_files SET {} WHERE id = ?{} AND status = ?{}",
            assignments.join(", "),
            id_param,
            values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            values.iter().map(|p| p.as_ref()).collect();
        let changed = tx.execute(&sql, params_ref.as_slice())?;
        if changed == 0 {
            // Another connection moved the row between the read and the write.
            let now: String = tx.query_row(
                "SELECT status FROM audio_files WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )?;
            return Err(DatabaseError::InvalidTransition {
                id: id.to_string(),
                from: now.parse()?,
                to: update.status.unwrap_or(current),
            });
        }
        tx.commit()?;
        Ok(())
    })
}

/// Counts audio files with the given status.
pub fn count_by_status(db: &Database, status: AudioStatus) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM audio_files WHERE status = ?1",
            params![status.as_str()],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
