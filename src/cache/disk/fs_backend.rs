//! std::fs based backend (portable, works on all platforms)

use super::backend::DiskBackend;
use crate::error::CacheError;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Portable filesystem backend
#[derive(Debug, Default, Clone, Copy)]
pub struct FsBackend;

impl FsBackend {
    pub fn new() -> Self {
        Self
    }
}

impl DiskBackend for FsBackend {
    fn size_of(&self, path: &Path) -> Result<u64, CacheError> {
        Ok(fs::metadata(path)?.len())
    }

    fn last_modified(&self, path: &Path) -> Result<SystemTime, CacheError> {
        Ok(fs::metadata(path)?.modified()?)
    }

    fn set_last_modified(&self, path: &Path, time: SystemTime) -> Result<(), CacheError> {
        let file = File::options().write(true).open(path)?;
        file.set_modified(time)?;
        Ok(())
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn remove_file(&self, path: &Path) -> Result<(), CacheError> {
        fs::remove_file(path)?;
        Ok(())
    }

    fn list_files(&self, root: &Path) -> Result<Vec<PathBuf>, CacheError> {
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(|e| CacheError::Io(e.into()))?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }
}
