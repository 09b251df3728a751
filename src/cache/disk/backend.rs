//! Backend trait for filesystem operations

use crate::error::CacheError;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Abstraction over the local filesystem holding cached files
pub trait DiskBackend: Send + Sync {
    /// Size of a file in bytes
    fn size_of(&self, path: &Path) -> Result<u64, CacheError>;

    /// Last modification time, used as the LRU recency source
    fn last_modified(&self, path: &Path) -> Result<SystemTime, CacheError>;

    /// Overwrite the last modification time
    fn set_last_modified(&self, path: &Path, time: SystemTime) -> Result<(), CacheError>;

    fn file_exists(&self, path: &Path) -> bool;

    /// Delete a file
    fn remove_file(&self, path: &Path) -> Result<(), CacheError>;

    /// Recursively list all regular files under `root`
    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, CacheError>;
}
