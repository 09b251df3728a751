// Configuration module

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::cache::CacheConfig;
use crate::logging::LoggingConfig;

pub mod filesystem;
pub mod sync;

pub use filesystem::FilesystemConfig;
pub use sync::SyncConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub filesystems: Vec<FilesystemConfig>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        // Fail on the first referenced variable that is not set
        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            std::env::var(var_name).map_err(|_| {
                format!(
                    "Environment variable '{}' is referenced but not set",
                    var_name
                )
            })?;
        }

        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        });

        serde_yaml::from_str(&substituted).map_err(|e| e.to_string())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_yaml_with_env(&yaml)
    }

    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;
        self.sync.validate()?;
        self.logging.validate()?;

        let mut seen = HashSet::new();
        for filesystem in &self.filesystems {
            filesystem.validate()?;
            if !seen.insert(filesystem.descriptor()) {
                return Err(format!(
                    "Duplicate filesystem '{}'",
                    filesystem.descriptor()
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dfs::DfsType;

    const FULL: &str = r#"
cache:
  root: /data/cache
  capacity_mb: 512
  autoload: true
  resync_interval_secs: 30
sync:
  download_concurrency: 2
  chunk_size_bytes: 4096
filesystems:
  - dfs_type: hdfs
    host: namenode-1
    port: 8020
    remote_root: /mnt/hdfs
    max_connections: 4
  - dfs_type: s3a
    host: bucket
    port: 443
    remote_root: /mnt/s3
logging:
  level: debug
  json: true
"#;

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_yaml_with_env(FULL).unwrap();
        assert_eq!(config.cache.root, "/data/cache");
        assert_eq!(config.cache.capacity_mb, 512);
        assert_eq!(config.cache.resync_interval_secs, 30);
        assert_eq!(config.sync.download_concurrency, 2);
        assert_eq!(config.sync.chunk_size_bytes, 4096);
        assert_eq!(config.filesystems.len(), 2);
        assert_eq!(config.filesystems[0].dfs_type, DfsType::Hdfs);
        assert_eq!(config.filesystems[1].max_connections, 8);
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_yaml_with_env("{}").unwrap();
        assert_eq!(config.cache, CacheConfig::default());
        assert_eq!(config.sync, SyncConfig::default());
        assert!(config.filesystems.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_substitution() {
        std::env::set_var("DFS_CACHE_TEST_ROOT", "/from/env");
        let config =
            Config::from_yaml_with_env("cache:\n  root: ${DFS_CACHE_TEST_ROOT}\n").unwrap();
        assert_eq!(config.cache.root, "/from/env");
    }

    #[test]
    fn test_missing_env_var_is_error() {
        let err = Config::from_yaml_with_env("cache:\n  root: ${DFS_CACHE_TEST_UNSET_VAR}\n")
            .unwrap_err();
        assert!(err.contains("DFS_CACHE_TEST_UNSET_VAR"));
    }

    #[test]
    fn test_unknown_dfs_type_is_parse_error() {
        let yaml = "filesystems:\n  - dfs_type: ftp\n    host: h\n    port: 1\n    remote_root: /r\n";
        assert!(Config::from_yaml_with_env(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_filesystem() {
        let yaml = r#"
filesystems:
  - {dfs_type: hdfs, host: nn, port: 8020, remote_root: /a}
  - {dfs_type: hdfs, host: nn, port: 8020, remote_root: /b}
"#;
        let config = Config::from_yaml_with_env(yaml).unwrap();
        assert!(config.validate().unwrap_err().contains("Duplicate filesystem"));
    }

    #[test]
    fn test_validate_rejects_bad_filesystem() {
        let yaml = "filesystems:\n  - {dfs_type: hdfs, host: '', port: 1, remote_root: /r}\n";
        let config = Config::from_yaml_with_env(yaml).unwrap();
        assert!(config.validate().is_err());

        let yaml = "filesystems:\n  - {dfs_type: default, host: h, port: 1, remote_root: /r}\n";
        let config = Config::from_yaml_with_env(yaml).unwrap();
        assert!(config.validate().unwrap_err().contains("dfs_type"));
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = Config::from_yaml_with_env("sync:\n  download_concurrency: 0\n").unwrap();
        assert!(config.validate().unwrap_err().contains("download_concurrency"));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/dfs-cache.yaml").unwrap_err();
        assert!(err.contains("Failed to read config file"));
    }
}
