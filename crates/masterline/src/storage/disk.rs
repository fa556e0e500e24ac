use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// Path resolution and existence checks on a configured disk.
///
/// Relative paths are resolved against the disk root; absolute paths pass
/// through unchanged.
pub trait Storage: Send + Sync {
    fn path(&self, relative: &Path) -> PathBuf;

    fn exists(&self, relative: &Path) -> bool {
        self.path(relative).is_file()
    }

    fn size(&self, relative: &Path) -> Result<u64, StorageError>;

    /// Deletes the file. Returns `Ok(false)` when there was nothing to delete.
    fn delete(&self, relative: &Path) -> Result<bool, StorageError>;
}

/// A disk rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalDisk {
    root: PathBuf,
}

impl LocalDisk {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Storage for LocalDisk {
    fn path(&self, relative: &Path) -> PathBuf {
        if relative.is_absolute() {
            relative.to_path_buf()
        } else {
            self.root.join(relative)
        }
    }

    fn size(&self, relative: &Path) -> Result<u64, StorageError> {
        let path = self.path(relative);
        std::fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|e| StorageError::Metadata { path, source: e })
    }

    fn delete(&self, relative: &Path) -> Result<bool, StorageError> {
        let path = self.path(relative);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFile { path, source: e }),
        }
    }
}
