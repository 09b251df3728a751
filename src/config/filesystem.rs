//! Remote filesystem (namenode) configuration.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_MAX_CONNECTIONS;
use crate::dfs::{DfsType, FileSystemDescriptor};

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

/// One remote filesystem the cache may fetch from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilesystemConfig {
    pub dfs_type: DfsType,
    pub host: String,
    pub port: u16,
    /// Local directory served as this filesystem's content
    pub remote_root: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl FilesystemConfig {
    pub fn descriptor(&self) -> FileSystemDescriptor {
        FileSystemDescriptor::new(self.dfs_type, self.host.clone(), self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.host.is_empty() {
            return Err("filesystem host cannot be empty".to_string());
        }
        if self.host.contains('/') {
            return Err(format!("filesystem host '{}' cannot contain '/'", self.host));
        }
        if self.dfs_type == DfsType::NonSpecified {
            return Err(format!(
                "filesystem '{}' needs an explicit dfs_type",
                self.host
            ));
        }
        if self.remote_root.is_empty() {
            return Err(format!("filesystem '{}' has empty remote_root", self.host));
        }
        if self.max_connections == 0 {
            return Err(format!(
                "filesystem '{}' must allow at least one connection",
                self.host
            ));
        }
        Ok(())
    }
}
