//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

use super::AudioStatus;

/// Errors from database operations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// SQLite error from rusqlite.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error when creating directories or files.
    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration failed to apply.
    #[error("Migration failed at version {version}: {reason}")]
    Migration { version: u32, reason: String },

    /// A JSON column could not be encoded or decoded.
    #[error("Invalid JSON in column '{column}': {source}")]
    Json {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A stored value is outside its allowed set.
    #[error("Invalid value '{value}' in column '{column}'")]
    InvalidValue { column: &'static str, value: String },

    /// No row with the given id.
    #[error("No {table} row with id '{id}'")]
    NotFound { table: &'static str, id: String },

    /// The stored status does not allow the requested move.
    #[error("Audio file {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: AudioStatus,
        to: AudioStatus,
    },

    /// The database lock was poisoned.
    #[error("Database lock poisoned")]
    LockPoisoned,
}
