//! Prometheus metrics for the file cache
//!
//! A process-global registry mirroring [`CacheStats`](crate::cache::CacheStats)
//! plus download outcomes. Exported in the Prometheus text format by the
//! `stats` command.

use crate::sync::TaskOverallStatus;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};
use std::sync::OnceLock;

/// Global cache metrics
pub struct CacheMetrics {
    pub hits: IntCounter,
    pub misses: IntCounter,
    pub evictions: IntCounter,
    pub load_failures: IntCounter,

    /// Current total weight in bytes
    pub weight_bytes: IntGauge,
    pub items: IntGauge,
    pub capacity_bytes: IntGauge,

    /// Completed prepare requests by overall status
    pub downloads: IntCounterVec,
    pub download_bytes: IntCounter,
}

static METRICS: OnceLock<CacheMetrics> = OnceLock::new();

impl CacheMetrics {
    /// Initialize and return the global metrics instance
    pub fn global() -> &'static Self {
        METRICS.get_or_init(|| {
            let cache_ops = register_int_counter_vec!(
                "dfs_cache_operations_total",
                "Total number of cache operations by type",
                &["operation"] // hit, miss, eviction, load_failure
            )
            .expect("Failed to register dfs_cache_operations_total metric");

            let weight_bytes = register_int_gauge!(
                "dfs_cache_weight_bytes",
                "Current total weight of cached files in bytes"
            )
            .expect("Failed to register dfs_cache_weight_bytes metric");

            let items = register_int_gauge!(
                "dfs_cache_items",
                "Current number of managed files"
            )
            .expect("Failed to register dfs_cache_items metric");

            let capacity_bytes = register_int_gauge!(
                "dfs_cache_capacity_bytes",
                "Configured cache capacity in bytes"
            )
            .expect("Failed to register dfs_cache_capacity_bytes metric");

            let downloads = register_int_counter_vec!(
                "dfs_cache_downloads_total",
                "Completed prepare requests by overall status",
                &["status"]
            )
            .expect("Failed to register dfs_cache_downloads_total metric");

            let download_bytes = register_int_counter!(
                "dfs_cache_download_bytes_total",
                "Bytes copied from remote filesystems"
            )
            .expect("Failed to register dfs_cache_download_bytes_total metric");

            CacheMetrics {
                hits: cache_ops.with_label_values(&["hit"]),
                misses: cache_ops.with_label_values(&["miss"]),
                evictions: cache_ops.with_label_values(&["eviction"]),
                load_failures: cache_ops.with_label_values(&["load_failure"]),
                weight_bytes,
                items,
                capacity_bytes,
                downloads,
                download_bytes,
            }
        })
    }

    pub fn record_download(&self, status: TaskOverallStatus, bytes: u64) {
        self.downloads.with_label_values(&[status.as_str()]).inc();
        self.download_bytes.inc_by(bytes);
    }

    /// Refresh the size gauges
    pub fn set_occupancy(&self, weight_bytes: u64, items: usize, capacity_bytes: u64) {
        self.weight_bytes.set(clamp_i64(weight_bytes));
        self.items.set(clamp_i64(items as u64));
        self.capacity_bytes.set(clamp_i64(capacity_bytes));
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Render every registered metric in the Prometheus text format
pub fn export_prometheus() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
