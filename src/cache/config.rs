//! File cache configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{DEFAULT_CACHE_ROOT, DEFAULT_CAPACITY_MB, DEFAULT_RESYNC_INTERVAL_SECS};

fn default_root() -> String {
    DEFAULT_CACHE_ROOT.to_string()
}

fn default_capacity_mb() -> u64 {
    DEFAULT_CAPACITY_MB
}

fn default_autoload() -> bool {
    true
}

fn default_resync_interval_secs() -> u64 {
    DEFAULT_RESYNC_INTERVAL_SECS
}

/// Local file cache configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Directory holding `<schema>/<host>/<port>/<relative>` trees
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_capacity_mb")]
    pub capacity_mb: u64,
    /// Fetch missing files on lookup
    #[serde(default = "default_autoload")]
    pub autoload: bool,
    /// Backoff before a forbidden file may be synced again
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            capacity_mb: default_capacity_mb(),
            autoload: default_autoload(),
            resync_interval_secs: default_resync_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(&self.root)
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_mb.saturating_mul(1024 * 1024)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.root.is_empty() {
            return Err("cache.root cannot be empty".to_string());
        }
        if self.capacity_mb == 0 {
            return Err("cache.capacity_mb must be greater than 0".to_string());
        }
        Ok(())
    }
}
