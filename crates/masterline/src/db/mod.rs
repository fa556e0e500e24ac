//! Persistence for audio files and presets.
//!
//! One SQLite file may be shared by several `masterline` processes, each
//! running its own worker pool. Within a process every access goes through
//! one locked connection; across processes SQLite's file lock serializes
//! writers and `busy_timeout` makes them wait for it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

pub mod audio_file_repo;
pub mod error;
pub mod metadata;
pub mod migrations;
pub mod preset_repo;
pub mod store;

pub use audio_file_repo::{AudioFile, AudioFileUpdate, AudioStatus};
pub use error::DatabaseError;
pub use preset_repo::Preset;
pub use store::AudioFileStore;

/// How long a writer waits for another process's lock. Status writes are
/// short transactions, so this only bites on a stuck peer.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens (or creates) the database file and brings its schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        log::info!("Database opened at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        migrations::run_all(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// `~/.masterline/data/masterline.db`
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".masterline").join("data").join("masterline.db"))
}
