pub mod cleanup;
pub mod disk;
pub mod lifecycle;

pub use cleanup::{CleanupHandler, CleanupReport};
pub use disk::{LocalDisk, Storage};
pub use lifecycle::{FileLifecycle, JobPaths, StoredPath};
