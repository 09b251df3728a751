//! Remote read contract

use super::pool::PooledConnection;
use crate::error::CacheError;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

/// What the sync layer needs from a remote filesystem
///
/// Both calls require a valid connection taken from the namenode's pool.
pub trait RemoteAdaptor: Send + Sync {
    /// Open a streaming reader over a remote file
    fn open(
        &self,
        connection: &PooledConnection,
        relative: &str,
    ) -> Result<Box<dyn Read + Send>, CacheError>;

    /// Size of a remote file in bytes
    fn size(&self, connection: &PooledConnection, relative: &str) -> Result<u64, CacheError>;
}

/// Serves a local directory as a remote filesystem
///
/// Used for `local` filesystems and wherever a real DFS is not available.
#[derive(Debug, Clone)]
pub struct LocalDirAdaptor {
    root: PathBuf,
}

impl LocalDirAdaptor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn remote_path(&self, connection: &PooledConnection, relative: &str) -> Result<PathBuf, CacheError> {
        if !connection.valid() {
            return Err(CacheError::NamenodeUnreachable(format!(
                "invalid connection for {}",
                self.root.display()
            )));
        }
        let relative = Path::new(relative.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(CacheError::RequestFailed(format!(
                "Path traversal attempt detected: {}",
                relative.display()
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl RemoteAdaptor for LocalDirAdaptor {
    fn open(
        &self,
        connection: &PooledConnection,
        relative: &str,
    ) -> Result<Box<dyn Read + Send>, CacheError> {
        let path = self.remote_path(connection, relative)?;
        let file = File::open(&path).map_err(|e| {
            CacheError::RequestFailed(format!("cannot open {}: {}", path.display(), e))
        })?;
        Ok(Box::new(file))
    }

    fn size(&self, connection: &PooledConnection, relative: &str) -> Result<u64, CacheError> {
        let path = self.remote_path(connection, relative)?;
        let metadata = std::fs::metadata(&path).map_err(|e| {
            CacheError::RequestFailed(format!("cannot stat {}: {}", path.display(), e))
        })?;
        Ok(metadata.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfs::pool::ConnectionPool;
    use tempfile::TempDir;

    #[test]
    fn test_reads_file_under_root() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/b.txt"), b"remote bytes").unwrap();

        let adaptor = LocalDirAdaptor::new(dir.path());
        let pool = ConnectionPool::new(1);
        let conn = pool.get_free_connection();

        assert_eq!(adaptor.size(&conn, "a/b.txt").unwrap(), 12);
        let mut content = String::new();
        adaptor
            .open(&conn, "/a/b.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "remote bytes");
    }

    #[test]
    fn test_rejects_traversal_and_invalid_connection() {
        let dir = TempDir::new().unwrap();
        let adaptor = LocalDirAdaptor::new(dir.path());
        let pool = ConnectionPool::new(1);

        let conn = pool.get_free_connection();
        assert!(matches!(
            adaptor.size(&conn, "../secret"),
            Err(CacheError::RequestFailed(_))
        ));

        let invalid = pool.get_free_connection();
        assert!(matches!(
            adaptor.size(&invalid, "file"),
            Err(CacheError::NamenodeUnreachable(_))
        ));
    }

    #[test]
    fn test_missing_remote_file_is_request_failure() {
        let dir = TempDir::new().unwrap();
        let adaptor = LocalDirAdaptor::new(dir.path());
        let pool = ConnectionPool::new(1);
        let conn = pool.get_free_connection();
        assert!(matches!(
            adaptor.open(&conn, "missing"),
            Err(CacheError::RequestFailed(_))
        ));
    }
}
