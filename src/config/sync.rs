//! Download subsystem configuration.
//!
//! Default values are sourced from `crate::constants`.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_DOWNLOAD_CONCURRENCY,
    DEFAULT_ESTIMATED_THROUGHPUT_BYTES_PER_SEC,
};

fn default_download_concurrency() -> usize {
    DEFAULT_DOWNLOAD_CONCURRENCY
}

fn default_chunk_size_bytes() -> usize {
    DEFAULT_CHUNK_SIZE_BYTES
}

fn default_throughput() -> u64 {
    DEFAULT_ESTIMATED_THROUGHPUT_BYTES_PER_SEC
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Files downloaded in parallel across all requests
    #[serde(default = "default_download_concurrency")]
    pub download_concurrency: usize,
    /// Read size between two cancellation checks
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,
    /// Used to estimate transfer times
    #[serde(default = "default_throughput")]
    pub estimated_throughput_bytes_per_sec: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            download_concurrency: default_download_concurrency(),
            chunk_size_bytes: default_chunk_size_bytes(),
            estimated_throughput_bytes_per_sec: default_throughput(),
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.download_concurrency == 0 {
            return Err("sync.download_concurrency must be greater than 0".to_string());
        }
        if self.chunk_size_bytes == 0 {
            return Err("sync.chunk_size_bytes must be greater than 0".to_string());
        }
        if self.estimated_throughput_bytes_per_sec == 0 {
            return Err("sync.estimated_throughput_bytes_per_sec must be greater than 0".to_string());
        }
        Ok(())
    }
}
