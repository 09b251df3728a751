//! LRU cache of managed files
//!
//! [`FileSystemPolicy`] plugs [`ManagedFile`] into the generic
//! [`EvictionCache`]:
//! - weight: on-disk size, then size deltas reported by the file
//! - idle: not HAS_CLIENTS
//! - timestamp: on-disk modification time
//! - delete: mark for deletion; dispose: remove the local file
//! - construct/load: new file plus a continuation on a miss
//!
//! [`FileSystemLruCache`] adds what callers need on top: rebuilding the
//! index from the cache directory, and acquiring a file for use.

use crate::cache::continuation::{ContinuationCoordinator, ContinuationOutcome};
use crate::cache::eviction::{AddResult, CachePolicy, EvictionCache, EvictionReport, WeightReporter};
use crate::cache::managed_file::{FileState, ManagedFile, ManagedFileContext};
use crate::cache::stats::CacheStats;
use crate::constants::{MAX_ACQUIRE_ATTEMPTS, PARTIAL_FILE_SUFFIX};
use crate::error::CacheError;
use crate::metrics::CacheMetrics;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Cache policy for managed files
pub struct FileSystemPolicy {
    ctx: ManagedFileContext,
    coordinator: ContinuationCoordinator,
    capacity: AtomicU64,
}

impl FileSystemPolicy {
    pub fn new(ctx: ManagedFileContext, coordinator: ContinuationCoordinator, capacity: u64) -> Self {
        Self {
            ctx,
            coordinator,
            capacity: AtomicU64::new(capacity),
        }
    }

    pub fn context(&self) -> &ManagedFileContext {
        &self.ctx
    }

    pub fn set_capacity(&self, capacity: u64) {
        self.capacity.store(capacity, Ordering::Release);
    }
}

impl CachePolicy for FileSystemPolicy {
    type Key = PathBuf;
    type Item = ManagedFile;

    fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Acquire)
    }

    fn weight(&self, file: &ManagedFile) -> u64 {
        file.size()
    }

    fn is_idle(&self, file: &ManagedFile) -> bool {
        file.state() != FileState::HasClients
    }

    fn timestamp(&self, file: &ManagedFile) -> SystemTime {
        file.last_access()
    }

    fn set_timestamp(&self, file: &ManagedFile, time: SystemTime) {
        if !file.exists() {
            return;
        }
        if let Err(e) = file.set_last_access(time) {
            debug!(path = %file.local_path().display(), error = %e, "Failed to touch cached file");
        }
    }

    fn delete(&self, file: &ManagedFile) -> bool {
        let outcome = file.mark_for_deletion();
        if !outcome.is_marked() {
            return false;
        }
        if !outcome.is_safe() {
            debug!(
                path = %file.local_path().display(),
                subscribers = file.subscribers(),
                "Deleted file still had subscribers"
            );
        }
        true
    }

    fn dispose(&self, file: &ManagedFile) {
        file.drop_file();
    }

    fn construct(
        &self,
        key: &PathBuf,
        reporter: WeightReporter<PathBuf, ManagedFile>,
    ) -> Option<ManagedFile> {
        let file = ManagedFile::with_weight_callback(
            key.clone(),
            &self.ctx,
            Box::new(move |delta| reporter.report(delta)),
        );
        if !file.valid() {
            debug!(path = %key.display(), "Not caching file with unresolvable origin");
            return None;
        }
        Some(file)
    }

    fn load(&self, file: &Arc<ManagedFile>) -> bool {
        match self.coordinator.continuation_for(file) {
            ContinuationOutcome::Ready => true,
            ContinuationOutcome::Forbidden => false,
            ContinuationOutcome::Skipped => file.exists(),
            ContinuationOutcome::NotScheduled(e) => {
                // Nobody will complete this sync; release the waiters.
                warn!(
                    path = %file.local_path().display(),
                    error = %e,
                    "Forbidding file whose download could not be scheduled"
                );
                file.set_state(FileState::Forbidden);
                false
            }
        }
    }
}

/// Shared usage of a cached file
///
/// The file stays HAS_CLIENTS, and therefore out of eviction's reach,
/// until the last handle is dropped.
#[derive(Debug)]
pub struct FileHandle {
    file: Arc<ManagedFile>,
}

impl FileHandle {
    pub fn file(&self) -> &Arc<ManagedFile> {
        &self.file
    }

    pub fn path(&self) -> &Path {
        self.file.local_path()
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        self.file.detach_client();
    }
}

/// Local file cache bounded by capacity
pub struct FileSystemLruCache {
    cache: EvictionCache<FileSystemPolicy>,
}

impl FileSystemLruCache {
    pub fn new(
        ctx: ManagedFileContext,
        coordinator: ContinuationCoordinator,
        capacity: u64,
        autoload: bool,
    ) -> Self {
        let policy = FileSystemPolicy::new(ctx, coordinator, capacity);
        let cache = Self {
            cache: EvictionCache::new(policy, autoload),
        };
        cache.publish_metrics();
        cache
    }

    pub fn root(&self) -> PathBuf {
        self.cache.policy().context().resolver.root()
    }

    /// Look a file up; on a miss with autoload on, fetch it first
    ///
    /// Blocks for the whole download on a miss.
    pub fn find(&self, path: &Path) -> Option<Arc<ManagedFile>> {
        let file = self.cache.find(&path.to_path_buf());
        self.publish_metrics();
        file
    }

    /// Register a file without fetching it
    ///
    /// Returns the cached entry, which is the existing one if the path was
    /// already present, or `None` if the path has no resolvable origin.
    pub fn add(&self, path: &Path) -> Option<Arc<ManagedFile>> {
        let key = path.to_path_buf();
        let reporter = self.cache.weight_reporter(&key);
        let file = self.cache.policy().construct(&key, reporter.clone())?;
        let file = self.cache.add_with_reporter(reporter, file).into_item();
        self.publish_metrics();
        Some(file)
    }

    /// Drop the index entry without deleting anything
    pub fn remove(&self, path: &Path) -> Option<Arc<ManagedFile>> {
        let file = self.cache.remove(&path.to_path_buf());
        self.publish_metrics();
        file
    }

    /// Delete an idle file; `physically` also removes it from disk
    pub fn delete(&self, path: &Path, physically: bool) -> bool {
        let deleted = self.cache.delete(&path.to_path_buf(), physically);
        self.publish_metrics();
        deleted
    }

    pub fn evict(&self) -> EvictionReport<PathBuf> {
        let report = self.cache.evict();
        self.publish_metrics();
        report
    }

    pub fn set_capacity(&self, capacity: u64) {
        self.cache.policy().set_capacity(capacity);
        self.evict();
    }

    pub fn capacity(&self) -> u64 {
        self.cache.policy().capacity()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn total_weight(&self) -> u64 {
        self.cache.total_weight()
    }

    pub fn start_time(&self) -> SystemTime {
        self.cache.start_time()
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Rebuild the index from the files under the cache root
    ///
    /// Entries that are in use (HAS_CLIENTS or IN_USE_BY_SYNC) keep their
    /// identity. Every other entry is marked for deletion and forgotten,
    /// leaving its file on disk to be adopted again. Files are registered
    /// oldest first and become IDLE. Files whose origin cannot be resolved
    /// are skipped; partial downloads no entry is syncing are removed.
    /// Returns the number of files registered from disk.
    pub fn reload(&self) -> Result<usize, CacheError> {
        let root = self.root();
        let backend = self.cache.policy().context().backend.clone();

        let released = self
            .cache
            .retain(|file| !file.mark_for_deletion().is_marked());
        let retained = self.cache.len();

        let mut stamped = Vec::new();
        for path in backend.list_files(&root)? {
            if let Some(target) = partial_target(&path) {
                if self.cache.contains(&target) {
                    continue;
                }
                info!(path = %path.display(), "Removing orphaned partial download");
                if let Err(e) = backend.remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to remove partial download");
                }
                continue;
            }
            match backend.last_modified(&path) {
                Ok(modified) => stamped.push((modified, path)),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable file"),
            }
        }
        stamped.sort_by(|a, b| a.0.cmp(&b.0));

        let mut registered = 0usize;
        let mut skipped = 0usize;
        for (_, path) in &stamped {
            if self.cache.contains(path) {
                continue;
            }
            let reporter = self.cache.weight_reporter(path);
            let Some(file) = self.cache.policy().construct(path, reporter.clone()) else {
                skipped += 1;
                continue;
            };
            if let AddResult::Inserted(file) = self.cache.add_with_reporter(reporter, file) {
                file.set_state(FileState::Idle);
                registered += 1;
            }
        }
        if let Some((earliest, _)) = stamped.first() {
            self.cache.set_start_time(*earliest);
        }
        self.publish_metrics();

        info!(
            root = %root.display(),
            registered = registered,
            retained = retained,
            released = released,
            skipped = skipped,
            total_weight = self.cache.total_weight(),
            "Cache reloaded from disk"
        );
        Ok(registered)
    }

    /// Find a file, wait for it to settle, and register a client on it
    ///
    /// A FORBIDDEN file is synced again once its backoff elapsed. Blocks
    /// while the file downloads.
    pub fn acquire(&self, path: &Path) -> Result<FileHandle, CacheError> {
        for attempt in 1..=MAX_ACQUIRE_ATTEMPTS {
            let file = self.find(path).ok_or_else(|| {
                CacheError::Forbidden(format!("{} cannot be cached", path.display()))
            })?;

            match file.wait_until_settled() {
                FileState::Idle | FileState::HasClients => {
                    if file.attach_client() {
                        return Ok(FileHandle { file });
                    }
                }
                FileState::Forbidden => {
                    if !file.should_try_resync() {
                        return Err(CacheError::Forbidden(path.display().to_string()));
                    }
                    self.resync(&file);
                }
                FileState::Amorphous => self.resync(&file),
                FileState::MarkedForDeletion | FileState::InUseBySync => {}
            }
            debug!(path = %path.display(), attempt = attempt, "Retrying file acquisition");
        }

        Err(CacheError::RequestFailed(format!(
            "gave up acquiring {} after {} attempts",
            path.display(),
            MAX_ACQUIRE_ATTEMPTS
        )))
    }

    fn resync(&self, file: &Arc<ManagedFile>) {
        self.cache.load(file);
        self.publish_metrics();
    }

    fn publish_metrics(&self) {
        let stats = self.cache.stats();
        CacheMetrics::global().set_occupancy(
            stats.current_size_bytes,
            stats.current_item_count as usize,
            stats.max_size_bytes,
        );
    }
}

/// Final path of a `.part` download, `None` for any other file
fn partial_target(path: &Path) -> Option<PathBuf> {
    path.to_str()?
        .strip_suffix(PARTIAL_FILE_SUFFIX)
        .map(PathBuf::from)
}
