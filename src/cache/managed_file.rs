//! Managed file: one cached file and its lifecycle
//!
//! A `ManagedFile` keeps:
//! - the file state, guarded by a state machine (see [`FileState`]);
//! - the number of subscribers waiting for a state change;
//! - the number of open client handles (for leak detection);
//! - the remote identity recovered from its local path;
//! - size accounting reported to the owning cache through a weight callback.
//!
//! Every write of `state` happens under the file's state mutex, and the
//! state-changed condition is broadcast under the same mutex. Reads are
//! plain atomic loads.
//!
//! ```text
//! AMORPHOUS ──► IN_USE_BY_SYNC ──► IDLE ◄──► HAS_CLIENTS
//!    │                 │            │ ▲
//!    │                 ▼            │ └──── (resync)
//!    │             FORBIDDEN ───────┤
//!    ▼                              ▼
//! MARKED_FOR_DELETION ◄─────────────┘   (terminal)
//! ```

use crate::cache::disk::DiskBackend;
use crate::dfs::{DfsType, Origin, PathResolver};
use crate::error::CacheError;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// State of a cached file
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    /// Scheduled for destruction; no further mutation is possible
    MarkedForDeletion = 0,
    /// Being downloaded; acts as the lock against a second download
    InUseBySync = 1,
    /// At least one client is using the content
    HasClients = 2,
    /// Registered but not approved by anybody yet
    Amorphous = 3,
    /// Present locally and unused; the only state eviction prefers
    Idle = 4,
    /// Could not be resolved or synced; retried after the resync backoff
    Forbidden = 5,
}

impl FileState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => FileState::MarkedForDeletion,
            1 => FileState::InUseBySync,
            2 => FileState::HasClients,
            3 => FileState::Amorphous,
            4 => FileState::Idle,
            _ => FileState::Forbidden,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::MarkedForDeletion => "marked_for_deletion",
            FileState::InUseBySync => "in_use_by_sync",
            FileState::HasClients => "has_clients",
            FileState::Amorphous => "amorphous",
            FileState::Idle => "idle",
            FileState::Forbidden => "forbidden",
        }
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    ///
    /// `Amorphous -> Idle` is the adoption edge used when a file already
    /// present on disk is registered by `reload`.
    pub fn can_transition_to(self, next: FileState) -> bool {
        use FileState::*;
        matches!(
            (self, next),
            (Amorphous, InUseBySync)
                | (Amorphous, Forbidden)
                | (Amorphous, MarkedForDeletion)
                | (Amorphous, Idle)
                | (InUseBySync, Idle)
                | (InUseBySync, Forbidden)
                | (Idle, HasClients)
                | (Idle, MarkedForDeletion)
                | (Idle, InUseBySync)
                | (HasClients, Idle)
                | (Forbidden, InUseBySync)
                | (Forbidden, MarkedForDeletion)
        )
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`ManagedFile::mark_for_deletion`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionOutcome {
    /// Marked and nobody was subscribed: safe to tear down
    Deleted,
    /// Marked, but subscribers were registered; they have been woken and
    /// will observe the terminal state
    DeletedWhileReferenced,
    /// Not marked: the file is being synced or used by clients
    Busy,
}

impl DeletionOutcome {
    pub fn is_marked(&self) -> bool {
        !matches!(self, DeletionOutcome::Busy)
    }

    pub fn is_safe(&self) -> bool {
        matches!(self, DeletionOutcome::Deleted)
    }
}

/// Callback fired with a signed size delta whenever the estimated size changes
pub type WeightChangedCallback = Box<dyn Fn(i64) + Send + Sync>;

/// Everything a file needs from its environment
#[derive(Clone)]
pub struct ManagedFileContext {
    pub resolver: Arc<PathResolver>,
    pub backend: Arc<dyn DiskBackend>,
    /// Minimum time between two sync attempts of a forbidden file
    pub min_resync_interval: Duration,
}

#[derive(Debug, Clone, Copy)]
struct SizeEstimate {
    estimated: u64,
    previous: u64,
}

/// A file managed by the cache
pub struct ManagedFile {
    state: AtomicU8,
    subscribers: AtomicUsize,
    users: AtomicU32,

    local_path: PathBuf,
    origin: Option<Origin>,

    estimate: Mutex<SizeEstimate>,
    last_sync_attempt: Mutex<Option<Instant>>,
    min_resync_interval: Duration,

    backend: Arc<dyn DiskBackend>,

    state_mux: Mutex<()>,
    state_changed: Condvar,

    weight_changed: Option<WeightChangedCallback>,
}

impl ManagedFile {
    /// Create a file for a local cache path
    ///
    /// The file starts AMORPHOUS, or FORBIDDEN when its remote origin cannot
    /// be recovered from the path.
    pub fn new(path: impl Into<PathBuf>, ctx: &ManagedFileContext) -> Self {
        Self::build(path.into(), ctx, None)
    }

    /// Same as [`new`](Self::new), reporting size deltas to `callback`
    pub fn with_weight_callback(
        path: impl Into<PathBuf>,
        ctx: &ManagedFileContext,
        callback: WeightChangedCallback,
    ) -> Self {
        Self::build(path.into(), ctx, Some(callback))
    }

    fn build(
        local_path: PathBuf,
        ctx: &ManagedFileContext,
        weight_changed: Option<WeightChangedCallback>,
    ) -> Self {
        let origin = ctx.resolver.resolve_origin(&local_path);
        let state = if origin.is_some() {
            FileState::Amorphous
        } else {
            debug!(path = %local_path.display(), "Cannot resolve file origin, file is forbidden");
            FileState::Forbidden
        };

        // A file already on disk starts with its current size as the estimate.
        let initial = ctx.backend.size_of(&local_path).unwrap_or(0);

        Self {
            state: AtomicU8::new(state as u8),
            subscribers: AtomicUsize::new(0),
            users: AtomicU32::new(0),
            local_path,
            origin,
            estimate: Mutex::new(SizeEstimate {
                estimated: initial,
                previous: initial,
            }),
            last_sync_attempt: Mutex::new(None),
            min_resync_interval: ctx.min_resync_interval,
            backend: ctx.backend.clone(),
            state_mux: Mutex::new(()),
            state_changed: Condvar::new(),
            weight_changed,
        }
    }

    // ---------------------------------------------------------------------
    // Identity
    // ---------------------------------------------------------------------

    /// Fully qualified local path; the cache key
    pub fn local_path(&self) -> &Path {
        &self.local_path
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    pub fn network_path(&self) -> Option<&str> {
        self.origin.as_ref().map(|o| o.network_path.as_str())
    }

    pub fn relative_name(&self) -> Option<&str> {
        self.origin.as_ref().map(|o| o.relative_name.as_str())
    }

    pub fn host(&self) -> Option<&str> {
        self.origin.as_ref().map(|o| o.descriptor.host.as_str())
    }

    pub fn port(&self) -> Option<u16> {
        self.origin.as_ref().map(|o| o.descriptor.port)
    }

    pub fn schema(&self) -> DfsType {
        self.origin
            .as_ref()
            .map(|o| o.descriptor.dfs_type)
            .unwrap_or(DfsType::NonSpecified)
    }

    // ---------------------------------------------------------------------
    // State machine
    // ---------------------------------------------------------------------

    pub fn state(&self) -> FileState {
        FileState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Content is available: IDLE or HAS_CLIENTS
    pub fn exists(&self) -> bool {
        matches!(self.state(), FileState::Idle | FileState::HasClients)
    }

    /// Neither FORBIDDEN nor MARKED_FOR_DELETION
    pub fn valid(&self) -> bool {
        !matches!(
            self.state(),
            FileState::Forbidden | FileState::MarkedForDeletion
        )
    }

    /// Move the file to `next` and wake everybody waiting for a change
    ///
    /// Ignored once the file is MARKED_FOR_DELETION, and for edges outside
    /// the lifecycle graph. Returns whether `next` is now the state.
    pub fn set_state(&self, next: FileState) -> bool {
        let _guard = self.state_mux.lock();
        self.store_locked(next)
    }

    /// IN_USE_BY_SYNC gate: enter only if no other sync holds the file
    ///
    /// Returns false when the file is already being synced, used by
    /// clients, or terminal.
    pub fn begin_sync(&self) -> bool {
        let _guard = self.state_mux.lock();
        match self.state() {
            FileState::Amorphous | FileState::Idle | FileState::Forbidden => {
                self.store_locked(FileState::InUseBySync)
            }
            _ => false,
        }
    }

    // Caller holds `state_mux`.
    fn store_locked(&self, next: FileState) -> bool {
        let current = self.state();
        if current == FileState::MarkedForDeletion {
            return false;
        }
        if current != next && !current.can_transition_to(next) {
            warn!(
                path = %self.local_path.display(),
                from = %current,
                to = %next,
                "Rejected illegal file state transition"
            );
            return false;
        }
        if next == FileState::InUseBySync {
            *self.last_sync_attempt.lock() = Some(Instant::now());
        }
        self.state.store(next as u8, Ordering::Release);
        self.state_changed.notify_all();
        true
    }

    /// Try to move the file to MARKED_FOR_DELETION
    ///
    /// Only IDLE, FORBIDDEN and AMORPHOUS files can be marked. The state
    /// swap and the subscriber check happen under the state mutex, which
    /// is also taken by [`subscribe_for_updates`](Self::subscribe_for_updates),
    /// so nobody can subscribe between the two.
    pub fn mark_for_deletion(&self) -> DeletionOutcome {
        let _guard = self.state_mux.lock();

        for expected in [FileState::Idle, FileState::Forbidden, FileState::Amorphous] {
            if self
                .state
                .compare_exchange(
                    expected as u8,
                    FileState::MarkedForDeletion as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.state_changed.notify_all();
                let subscribers = self.subscribers.load(Ordering::Acquire);
                info!(
                    path = %self.local_path.display(),
                    previous_state = %expected,
                    subscribers = subscribers,
                    "Managed file marked for deletion"
                );
                return if subscribers == 0 {
                    DeletionOutcome::Deleted
                } else {
                    DeletionOutcome::DeletedWhileReferenced
                };
            }
        }

        debug!(
            path = %self.local_path.display(),
            state = %self.state(),
            "Managed file is busy, not marked for deletion"
        );
        DeletionOutcome::Busy
    }

    /// Subscribe for state-changed notifications
    ///
    /// Returns `None` once the file is MARKED_FOR_DELETION. The subscription
    /// is released when the returned guard is dropped.
    pub fn subscribe_for_updates(&self) -> Option<Subscription<'_>> {
        let _guard = self.state_mux.lock();
        if self.state() == FileState::MarkedForDeletion {
            return None;
        }
        self.subscribers.fetch_add(1, Ordering::AcqRel);
        Some(Subscription { file: self })
    }

    fn unsubscribe(&self) {
        self.subscribers.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn subscribers(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    /// Block while the file is being synced
    ///
    /// Returns the first state that is not IN_USE_BY_SYNC. A file that is
    /// already marked for deletion returns immediately.
    pub fn wait_until_settled(&self) -> FileState {
        match self.subscribe_for_updates() {
            Some(subscription) => subscription.wait_while(|s| s == FileState::InUseBySync),
            None => FileState::MarkedForDeletion,
        }
    }

    /// Whether the resync backoff since the last sync attempt has elapsed
    ///
    /// Meaningful for FORBIDDEN files. A file that was never synced may be
    /// tried right away.
    pub fn should_try_resync(&self) -> bool {
        match *self.last_sync_attempt.lock() {
            Some(at) => at.elapsed() > self.min_resync_interval,
            None => true,
        }
    }

    pub fn min_resync_interval(&self) -> Duration {
        self.min_resync_interval
    }

    // ---------------------------------------------------------------------
    // Clients
    // ---------------------------------------------------------------------

    /// Register a usage handle
    pub fn open(&self) -> Result<(), CacheError> {
        if self.state() == FileState::MarkedForDeletion {
            return Err(CacheError::Forbidden(format!(
                "{} is marked for deletion",
                self.local_path.display()
            )));
        }
        self.users.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Deregister a usage handle
    ///
    /// Closing more handles than were opened means a handle leaked or was
    /// closed twice.
    pub fn close(&self) -> Result<(), CacheError> {
        self.users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |u| u.checked_sub(1))
            .map(|_| ())
            .map_err(|_| {
                CacheError::Consistency(format!(
                    "unbalanced close of {}",
                    self.local_path.display()
                ))
            })
    }

    pub fn users(&self) -> u32 {
        self.users.load(Ordering::Acquire)
    }

    /// Open a handle and move IDLE to HAS_CLIENTS
    ///
    /// Fails unless the file is IDLE or already HAS_CLIENTS.
    pub fn attach_client(&self) -> bool {
        let _guard = self.state_mux.lock();
        match self.state() {
            FileState::Idle => {
                if !self.store_locked(FileState::HasClients) {
                    return false;
                }
            }
            FileState::HasClients => {}
            _ => return false,
        }
        self.users.fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Close a handle; the last one returns the file to IDLE
    pub fn detach_client(&self) {
        let _guard = self.state_mux.lock();
        if let Err(e) = self.close() {
            warn!(error = %e, "Client detached from a file it was not attached to");
            return;
        }
        if self.users() == 0 && self.state() == FileState::HasClients {
            self.store_locked(FileState::Idle);
        }
    }

    // ---------------------------------------------------------------------
    // Size and timestamps
    // ---------------------------------------------------------------------

    /// Size of the local file, 0 when it does not exist
    pub fn size(&self) -> u64 {
        self.backend.size_of(&self.local_path).unwrap_or(0)
    }

    pub fn estimated_size(&self) -> u64 {
        self.estimate.lock().estimated
    }

    /// Record a new size estimate and report `new - previous` to the owner
    ///
    /// An unchanged size reports nothing. The callback runs after the
    /// estimate lock is released.
    pub fn set_estimated_size(&self, size: u64) {
        let delta = {
            let mut estimate = self.estimate.lock();
            let delta = size as i64 - estimate.previous as i64;
            estimate.previous = size;
            estimate.estimated = size;
            delta
        };
        if delta == 0 {
            return;
        }
        if let Some(callback) = &self.weight_changed {
            callback(delta);
        }
    }

    /// Last modification time of the local file, now if unavailable
    pub fn last_access(&self) -> SystemTime {
        self.backend
            .last_modified(&self.local_path)
            .unwrap_or_else(|_| SystemTime::now())
    }

    /// Overwrite the local file's modification time
    pub fn set_last_access(&self, time: SystemTime) -> Result<(), CacheError> {
        if self.state() == FileState::Forbidden {
            return Err(CacheError::Forbidden(self.local_path.display().to_string()));
        }
        self.backend.set_last_modified(&self.local_path, time)
    }

    // ---------------------------------------------------------------------
    // Removal
    // ---------------------------------------------------------------------

    /// Remove the local file regardless of clients and subscribers
    pub fn force_delete(&self) -> Result<(), CacheError> {
        warn!(
            path = %self.local_path.display(),
            users = self.users(),
            subscribers = self.subscribers(),
            "Force deleting managed file"
        );
        self.backend.remove_file(&self.local_path)
    }

    /// Remove the local file as part of eviction
    pub fn drop_file(&self) {
        if !self.backend.file_exists(&self.local_path) {
            return;
        }
        if let Err(e) = self.backend.remove_file(&self.local_path) {
            warn!(
                path = %self.local_path.display(),
                error = %e,
                "Failed to remove evicted file from disk"
            );
        }
    }
}

impl fmt::Debug for ManagedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedFile")
            .field("local_path", &self.local_path)
            .field("state", &self.state())
            .field("subscribers", &self.subscribers())
            .field("users", &self.users())
            .field("network_path", &self.network_path())
            .finish()
    }
}

/// Live subscription to a file's state changes
///
/// Holding it keeps the subscriber count raised, which makes a concurrent
/// deletion report [`DeletionOutcome::DeletedWhileReferenced`].
pub struct Subscription<'a> {
    file: &'a ManagedFile,
}

impl Subscription<'_> {
    /// Block while `pred(state)` holds and return the first state that fails it
    ///
    /// Also returns as soon as the file is marked for deletion.
    pub fn wait_while(&self, pred: impl Fn(FileState) -> bool) -> FileState {
        let mut guard = self.file.state_mux.lock();
        loop {
            let state = self.file.state();
            if state == FileState::MarkedForDeletion || !pred(state) {
                return state;
            }
            self.file.state_changed.wait(&mut guard);
        }
    }

    /// Block until the state differs from `seen`
    pub fn wait_for_change(&self, seen: FileState) -> FileState {
        self.wait_while(|s| s == seen)
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.file.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::disk::mock_backend::MockDiskBackend;
    use std::sync::atomic::AtomicI64;
    use std::thread;

    const FILE: &str = "/cache/hdfs/nn/8020/data/part-0";

    fn context(backend: MockDiskBackend) -> ManagedFileContext {
        ManagedFileContext {
            resolver: Arc::new(PathResolver::new("/cache")),
            backend: Arc::new(backend),
            min_resync_interval: Duration::from_millis(50),
        }
    }

    fn file() -> ManagedFile {
        ManagedFile::new(FILE, &context(MockDiskBackend::new()))
    }

    #[test]
    fn test_resolvable_path_starts_amorphous() {
        let file = file();
        assert_eq!(file.state(), FileState::Amorphous);
        assert!(file.valid());
        assert!(!file.exists());
        assert_eq!(file.host(), Some("nn"));
        assert_eq!(file.port(), Some(8020));
        assert_eq!(file.schema(), DfsType::Hdfs);
        assert_eq!(file.relative_name(), Some("data/part-0"));
        assert_eq!(file.network_path(), Some("hdfs://nn:8020/data/part-0"));
        assert_eq!(file.subscribers(), 0);
        assert_eq!(file.users(), 0);
    }

    #[test]
    fn test_unresolvable_path_is_forbidden_and_invalid() {
        let file = ManagedFile::new("/tmp/not-in-cache", &context(MockDiskBackend::new()));
        assert_eq!(file.state(), FileState::Forbidden);
        assert!(!file.valid());
        assert!(file.origin().is_none());
        assert_eq!(file.schema(), DfsType::NonSpecified);
    }

    #[test]
    fn test_transition_table_matches_lifecycle() {
        use FileState::*;
        let all = [MarkedForDeletion, InUseBySync, HasClients, Amorphous, Idle, Forbidden];
        let allowed = [
            (Amorphous, InUseBySync),
            (Amorphous, Forbidden),
            (Amorphous, MarkedForDeletion),
            (Amorphous, Idle),
            (InUseBySync, Idle),
            (InUseBySync, Forbidden),
            (Idle, HasClients),
            (Idle, MarkedForDeletion),
            (Idle, InUseBySync),
            (HasClients, Idle),
            (Forbidden, InUseBySync),
            (Forbidden, MarkedForDeletion),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_set_state_rejects_illegal_transition() {
        let file = file();
        assert!(file.set_state(FileState::InUseBySync));
        assert!(!file.set_state(FileState::HasClients));
        assert_eq!(file.state(), FileState::InUseBySync);
        assert!(file.set_state(FileState::Idle));
        assert!(file.set_state(FileState::HasClients));
        assert!(!file.set_state(FileState::Forbidden));
        assert_eq!(file.state(), FileState::HasClients);
    }

    #[test]
    fn test_marked_file_ignores_further_state_changes() {
        let file = file();
        assert_eq!(file.mark_for_deletion(), DeletionOutcome::Deleted);
        assert!(!file.set_state(FileState::InUseBySync));
        assert!(!file.set_state(FileState::Idle));
        assert!(!file.begin_sync());
        assert_eq!(file.state(), FileState::MarkedForDeletion);
    }

    #[test]
    fn test_mark_for_deletion_from_each_state() {
        for (setup, expected) in [
            (vec![], DeletionOutcome::Deleted),
            (vec![FileState::InUseBySync], DeletionOutcome::Busy),
            (vec![FileState::InUseBySync, FileState::Idle], DeletionOutcome::Deleted),
            (vec![FileState::InUseBySync, FileState::Forbidden], DeletionOutcome::Deleted),
            (
                vec![FileState::InUseBySync, FileState::Idle, FileState::HasClients],
                DeletionOutcome::Busy,
            ),
        ] {
            let file = file();
            for state in &setup {
                assert!(file.set_state(*state));
            }
            let before = file.state();
            let outcome = file.mark_for_deletion();
            assert_eq!(outcome, expected, "from {}", before);
            if outcome.is_marked() {
                assert_eq!(file.state(), FileState::MarkedForDeletion);
            } else {
                assert_eq!(file.state(), before);
            }
        }
    }

    #[test]
    fn test_mark_for_deletion_with_subscriber_is_not_safe() {
        let file = file();
        let subscription = file.subscribe_for_updates().unwrap();
        let outcome = file.mark_for_deletion();
        assert_eq!(outcome, DeletionOutcome::DeletedWhileReferenced);
        assert!(outcome.is_marked());
        assert!(!outcome.is_safe());
        assert_eq!(file.state(), FileState::MarkedForDeletion);
        drop(subscription);
        assert_eq!(file.subscribers(), 0);
    }

    #[test]
    fn test_subscription_is_balance_neutral() {
        let file = file();
        let first = file.subscribe_for_updates().unwrap();
        let second = file.subscribe_for_updates().unwrap();
        assert_eq!(file.subscribers(), 2);
        first.unsubscribe();
        drop(second);
        assert_eq!(file.subscribers(), 0);
    }

    #[test]
    fn test_subscribe_fails_once_marked() {
        let file = file();
        file.mark_for_deletion();
        assert!(file.subscribe_for_updates().is_none());
        assert_eq!(file.subscribers(), 0);
    }

    #[test]
    fn test_estimated_size_reports_delta_from_previous() {
        let reported = Arc::new(AtomicI64::new(i64::MIN));
        let sink = reported.clone();
        let file = ManagedFile::with_weight_callback(
            FILE,
            &context(MockDiskBackend::new()),
            Box::new(move |delta| sink.store(delta, Ordering::SeqCst)),
        );

        file.set_estimated_size(100);
        assert_eq!(reported.load(Ordering::SeqCst), 100);
        file.set_estimated_size(250);
        assert_eq!(reported.load(Ordering::SeqCst), 150);
        file.set_estimated_size(40);
        assert_eq!(reported.load(Ordering::SeqCst), -210);
        assert_eq!(file.estimated_size(), 40);

        reported.store(i64::MIN, Ordering::SeqCst);
        file.set_estimated_size(40);
        assert_eq!(reported.load(Ordering::SeqCst), i64::MIN, "no delta, no report");
    }

    #[test]
    fn test_resync_backoff() {
        let file = file();
        assert!(file.should_try_resync());
        file.set_state(FileState::InUseBySync);
        file.set_state(FileState::Forbidden);
        assert!(!file.should_try_resync());
        thread::sleep(file.min_resync_interval() + Duration::from_millis(20));
        assert!(file.should_try_resync());
    }

    #[test]
    fn test_begin_sync_is_exclusive() {
        let file = file();
        assert!(file.begin_sync());
        assert!(!file.begin_sync());
        file.set_state(FileState::Idle);
        assert!(file.begin_sync());
    }

    #[test]
    fn test_waiter_wakes_on_state_change() {
        let file = Arc::new(file());
        file.set_state(FileState::InUseBySync);

        let waiter = {
            let file = file.clone();
            thread::spawn(move || file.wait_until_settled())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        file.set_state(FileState::Idle);
        assert_eq!(waiter.join().unwrap(), FileState::Idle);
        assert_eq!(file.subscribers(), 0);
    }

    #[test]
    fn test_waiter_wakes_on_deletion() {
        let file = Arc::new(file());
        file.set_state(FileState::InUseBySync);
        file.set_state(FileState::Forbidden);

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let waiter = {
            let file = file.clone();
            thread::spawn(move || {
                let subscription = file.subscribe_for_updates().unwrap();
                ready_tx.send(()).unwrap();
                subscription.wait_for_change(FileState::Forbidden)
            })
        };
        ready_rx.recv().unwrap();

        assert_eq!(file.mark_for_deletion(), DeletionOutcome::DeletedWhileReferenced);
        assert_eq!(waiter.join().unwrap(), FileState::MarkedForDeletion);
    }

    #[test]
    fn test_clients_toggle_has_clients() {
        let file = file();
        assert!(!file.attach_client(), "amorphous file cannot have clients");

        file.set_state(FileState::InUseBySync);
        file.set_state(FileState::Idle);
        assert!(file.attach_client());
        assert!(file.attach_client());
        assert_eq!(file.state(), FileState::HasClients);
        assert_eq!(file.users(), 2);

        file.detach_client();
        assert_eq!(file.state(), FileState::HasClients);
        file.detach_client();
        assert_eq!(file.state(), FileState::Idle);
        assert_eq!(file.users(), 0);
    }

    #[test]
    fn test_unbalanced_close_is_consistency_error() {
        let file = file();
        file.open().unwrap();
        file.close().unwrap();
        assert!(matches!(file.close(), Err(CacheError::Consistency(_))));
    }

    #[test]
    fn test_size_and_removal_go_through_backend() {
        let backend = MockDiskBackend::new();
        backend.put(FILE, 512, 10);
        let file = ManagedFile::new(FILE, &context(backend.clone()));

        assert_eq!(file.size(), 512);
        assert_eq!(
            file.last_access(),
            SystemTime::UNIX_EPOCH + Duration::from_secs(10)
        );

        file.drop_file();
        assert_eq!(backend.file_count(), 0);
        assert_eq!(file.size(), 0);
        assert!(file.force_delete().is_err());
    }

    #[test]
    fn test_set_last_access_refused_for_forbidden_file() {
        let backend = MockDiskBackend::new();
        backend.put(FILE, 1, 10);
        let file = ManagedFile::new(FILE, &context(backend));

        let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(99);
        file.set_last_access(stamp).unwrap();
        assert_eq!(file.last_access(), stamp);

        file.set_state(FileState::Forbidden);
        assert!(matches!(
            file.set_last_access(SystemTime::now()),
            Err(CacheError::Forbidden(_))
        ));
    }
}
