//! Mock disk backend for testing (in-memory HashMap storage)

use super::backend::DiskBackend;
use crate::error::CacheError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy)]
struct MockFile {
    size: u64,
    modified: SystemTime,
}

/// Mock backend that keeps file sizes and timestamps in memory
#[derive(Clone, Default)]
pub struct MockDiskBackend {
    files: Arc<RwLock<HashMap<PathBuf, MockFile>>>,
    /// Simulate errors if true
    simulate_permission_denied: Arc<RwLock<bool>>,
}

impl MockDiskBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a file whose mtime is `age_secs` after the epoch
    pub fn put(&self, path: impl Into<PathBuf>, size: u64, age_secs: u64) {
        self.files.write().insert(
            path.into(),
            MockFile {
                size,
                modified: SystemTime::UNIX_EPOCH + Duration::from_secs(age_secs),
            },
        );
    }

    /// Enable permission denied simulation for testing
    pub fn set_permission_denied(&self, enabled: bool) {
        *self.simulate_permission_denied.write() = enabled;
    }

    /// Get number of stored files
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    fn check_permission(&self) -> Result<(), CacheError> {
        if *self.simulate_permission_denied.read() {
            return Err(CacheError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "Simulated permission denied",
            )));
        }
        Ok(())
    }

    fn not_found() -> CacheError {
        CacheError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "File not found",
        ))
    }
}

impl DiskBackend for MockDiskBackend {
    fn size_of(&self, path: &Path) -> Result<u64, CacheError> {
        self.check_permission()?;
        self.files
            .read()
            .get(path)
            .map(|f| f.size)
            .ok_or_else(Self::not_found)
    }

    fn last_modified(&self, path: &Path) -> Result<SystemTime, CacheError> {
        self.check_permission()?;
        self.files
            .read()
            .get(path)
            .map(|f| f.modified)
            .ok_or_else(Self::not_found)
    }

    fn set_last_modified(&self, path: &Path, time: SystemTime) -> Result<(), CacheError> {
        self.check_permission()?;
        match self.files.write().get_mut(path) {
            Some(file) => {
                file.modified = time;
                Ok(())
            }
            None => Err(Self::not_found()),
        }
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }

    fn remove_file(&self, path: &Path) -> Result<(), CacheError> {
        self.check_permission()?;
        self.files
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(Self::not_found)
    }

    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, CacheError> {
        self.check_permission()?;
        Ok(self
            .files
            .read()
            .keys()
            .filter(|p| p.starts_with(root))
            .cloned()
            .collect())
    }
}
