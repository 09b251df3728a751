// Constants module - centralized default values for configuration
//
// Every default used by the config layer and the cache core lives here so
// the YAML defaults, the CLI and the tests agree on the same numbers.

// =============================================================================
// Cache defaults
// =============================================================================

/// Default root directory of the local cache
pub const DEFAULT_CACHE_ROOT: &str = "/var/cache/dfs-cache";

/// Default cache capacity in megabytes
pub const DEFAULT_CAPACITY_MB: u64 = 10240;

/// Default minimum interval between sync attempts of a forbidden file (6 minutes)
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 6 * 60;

/// Suffix of files that are still being downloaded into the cache
pub const PARTIAL_FILE_SUFFIX: &str = ".part";

/// How many times `acquire` re-resolves a file that was evicted under it
pub const MAX_ACQUIRE_ATTEMPTS: usize = 3;

// =============================================================================
// Sync (download) defaults
// =============================================================================

/// Default number of files downloaded in parallel
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

/// Default size of a single remote read (64 KB)
pub const DEFAULT_CHUNK_SIZE_BYTES: usize = 64 * 1024;

/// Default number of pooled connections per remote filesystem
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// Throughput assumed when estimating how long a download takes (50 MB/s)
pub const DEFAULT_ESTIMATED_THROUGHPUT_BYTES_PER_SEC: u64 = 50 * 1024 * 1024;

// =============================================================================
// Logging defaults
// =============================================================================

/// Default log level filter
pub const DEFAULT_LOG_LEVEL: &str = "info";
