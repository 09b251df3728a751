// Cache module

pub mod config;
pub mod continuation;
pub mod disk;
pub mod eviction;
pub mod filesystem;
pub mod managed_file;
pub mod stats;

pub use config::CacheConfig;
pub use continuation::{ContinuationCoordinator, ContinuationOutcome};
pub use eviction::{AddResult, CachePolicy, EvictionCache, EvictionReport, WeightReporter};
pub use filesystem::{FileHandle, FileSystemLruCache, FileSystemPolicy};
pub use managed_file::{
    DeletionOutcome, FileState, ManagedFile, ManagedFileContext, Subscription,
    WeightChangedCallback,
};
pub use stats::CacheStats;
