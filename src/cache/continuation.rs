//! Continuation: resolve a cache miss through the download subsystem
//!
//! The coordinator moves a file to IN_USE_BY_SYNC, schedules a prepare
//! request and blocks on a oneshot channel until the completion arrives.
//! The completion is then checked and the file resolved to IDLE or
//! FORBIDDEN, which wakes every subscriber of the file.
//!
//! While the download runs, the file's estimated size follows the progress
//! reported by the subsystem, so the owning cache accounts for bytes that
//! are still arriving. A failed sync resets the estimate to what is on disk.
//!
//! [`ContinuationCoordinator::continuation_for`] blocks the calling thread
//! and must not be called from inside an async runtime context.

use crate::cache::managed_file::{FileState, ManagedFile};
use crate::error::CacheError;
use crate::sync::{DownloadSubsystem, PrepareCompletion, ProgressSink, SessionContext};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// How a continuation ended
#[derive(Debug)]
pub enum ContinuationOutcome {
    /// The file was invalid or another sync already holds it
    Skipped,
    /// Download succeeded; the file is IDLE
    Ready,
    /// Download failed; the file is FORBIDDEN
    Forbidden,
    /// The prepare request could not be scheduled; the file is left
    /// IN_USE_BY_SYNC for the caller to recover
    NotScheduled(CacheError),
}

/// Drives files through a download and back
#[derive(Clone)]
pub struct ContinuationCoordinator {
    downloader: Arc<dyn DownloadSubsystem>,
}

impl ContinuationCoordinator {
    pub fn new(downloader: Arc<dyn DownloadSubsystem>) -> Self {
        Self { downloader }
    }

    pub fn downloader(&self) -> &Arc<dyn DownloadSubsystem> {
        &self.downloader
    }

    /// Sync `file` and resolve it to IDLE or FORBIDDEN
    ///
    /// Only files with a remote origin are synced. A FORBIDDEN file is
    /// retried only once its resync backoff elapsed, and a file marked for
    /// deletion never is.
    pub fn continuation_for(&self, file: &Arc<ManagedFile>) -> ContinuationOutcome {
        let Some(origin) = file.origin() else {
            debug!(path = %file.local_path().display(), "Skipping sync of file without origin");
            return ContinuationOutcome::Skipped;
        };
        match file.state() {
            FileState::MarkedForDeletion => return ContinuationOutcome::Skipped,
            FileState::Forbidden if !file.should_try_resync() => {
                debug!(path = %file.local_path().display(), "Forbidden file is still backing off");
                return ContinuationOutcome::Skipped;
            }
            _ => {}
        }
        if !file.begin_sync() {
            debug!(path = %file.local_path().display(), "File is already being synced");
            return ContinuationOutcome::Skipped;
        }

        let session = SessionContext::new();
        let (sender, receiver) = oneshot::channel();
        let relative_names = vec![origin.relative_name.clone()];

        let growing = Arc::downgrade(file);
        let on_progress: ProgressSink = Arc::new(move |_: &str, bytes: u64| {
            if let Some(file) = growing.upgrade() {
                file.set_estimated_size(bytes);
            }
        });

        match self.downloader.prepare_with_progress(
            session,
            &origin.descriptor,
            relative_names,
            on_progress,
            sender,
        ) {
            Ok(request) => debug!(
                session = %session,
                request = %request,
                network_path = %origin.network_path,
                "Waiting for file to be prepared"
            ),
            Err(e) => {
                error!(
                    network_path = %origin.network_path,
                    category = e.category().as_str(),
                    error = %e,
                    "Failed to schedule file preparation"
                );
                return ContinuationOutcome::NotScheduled(e);
            }
        }

        let completion = match receiver.blocking_recv() {
            Ok(completion) => completion,
            Err(_) => {
                error!(
                    network_path = %origin.network_path,
                    "Download subsystem dropped the request without completing it"
                );
                file.set_estimated_size(file.size());
                file.set_state(FileState::Forbidden);
                return ContinuationOutcome::Forbidden;
            }
        };

        match verify_completion(&session, 1, &completion) {
            Ok(()) => {
                file.set_estimated_size(file.size());
                file.set_state(FileState::Idle);
                info!(
                    network_path = %origin.network_path,
                    bytes = completion.performance.bytes_transferred,
                    "File is ready"
                );
                ContinuationOutcome::Ready
            }
            Err(e) => {
                match e {
                    CacheError::Consistency(_) => error!(
                        network_path = %origin.network_path,
                        error = %e,
                        "Inconsistent prepare completion"
                    ),
                    _ => warn!(
                        network_path = %origin.network_path,
                        status = %completion.status,
                        error = %e,
                        "File could not be prepared"
                    ),
                }
                file.set_estimated_size(file.size());
                file.set_state(FileState::Forbidden);
                ContinuationOutcome::Forbidden
            }
        }
    }
}

/// Structural and status checks of a completion
fn verify_completion(
    session: &SessionContext,
    expected_files: usize,
    completion: &PrepareCompletion,
) -> Result<(), CacheError> {
    if completion.session != *session {
        return Err(CacheError::Consistency(format!(
            "completion for session {} delivered to session {}",
            completion.session, session
        )));
    }
    if completion.progress.len() != expected_files {
        return Err(CacheError::Consistency(format!(
            "expected progress for {} file(s), got {}",
            expected_files,
            completion.progress.len()
        )));
    }
    if completion.canceled {
        return Err(CacheError::Canceled);
    }
    if !completion.overall_success {
        return Err(CacheError::RequestFailed(completion.status.to_string()));
    }
    if let Some(pending) = completion.progress.iter().find(|p| !p.done) {
        return Err(CacheError::Consistency(format!(
            "request reported success but '{}' is not complete",
            pending.relative_name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::disk::mock_backend::MockDiskBackend;
    use crate::cache::managed_file::ManagedFileContext;
    use crate::dfs::{FileSystemDescriptor, PathResolver};
    use crate::sync::{
        CompletionSender, FileProgress, RequestIdentity, RequestPerformance, TaskOverallStatus,
    };
    use parking_lot::Mutex;
    use std::thread;
    use std::time::Duration;

    const FILE: &str = "/cache/hdfs/nn/8020/dir/file";

    #[derive(Clone, Copy)]
    enum Script {
        Succeed,
        Fail,
        FailAfterProgress,
        Cancel,
        WrongProgressCount,
        SuccessNotDone,
        ForeignSession,
        DropSender,
        RefuseToSchedule,
    }

    /// Download subsystem answering from a background thread
    struct ScriptedDownloader {
        script: Script,
        backend: MockDiskBackend,
        requests: Mutex<Vec<(FileSystemDescriptor, Vec<String>)>>,
        on_progress: Mutex<Option<ProgressSink>>,
    }

    impl ScriptedDownloader {
        fn new(script: Script, backend: MockDiskBackend) -> Self {
            Self {
                script,
                backend,
                requests: Mutex::new(Vec::new()),
                on_progress: Mutex::new(None),
            }
        }
    }

    impl DownloadSubsystem for ScriptedDownloader {
        fn prepare(
            &self,
            session: SessionContext,
            filesystem: &FileSystemDescriptor,
            relative_names: Vec<String>,
            on_complete: CompletionSender,
        ) -> Result<RequestIdentity, CacheError> {
            if let Script::RefuseToSchedule = self.script {
                return Err(CacheError::NamenodeUnreachable(filesystem.to_string()));
            }
            self.requests
                .lock()
                .push((filesystem.clone(), relative_names.clone()));

            let script = self.script;
            let backend = self.backend.clone();
            let on_progress = self.on_progress.lock().take();
            thread::spawn(move || {
                if let Some(sink) = on_progress {
                    for name in &relative_names {
                        sink(name, 64);
                    }
                }
                thread::sleep(Duration::from_millis(10));
                let progress: Vec<FileProgress> = relative_names
                    .iter()
                    .map(|name| FileProgress {
                        relative_name: name.clone(),
                        local_bytes: 64,
                        done: !matches!(
                            script,
                            Script::SuccessNotDone | Script::Fail | Script::FailAfterProgress
                        ),
                        ..Default::default()
                    })
                    .collect();
                if matches!(script, Script::Succeed) {
                    backend.put(FILE, 64, 1_000);
                }
                let (success, canceled, status) = match script {
                    Script::Fail | Script::FailAfterProgress => {
                        (false, false, TaskOverallStatus::Failure)
                    }
                    Script::Cancel => (false, true, TaskOverallStatus::Canceled),
                    _ => (true, false, TaskOverallStatus::CompletedOk),
                };
                let completion = PrepareCompletion {
                    session: match script {
                        Script::ForeignSession => SessionContext::new(),
                        _ => session,
                    },
                    progress: match script {
                        Script::WrongProgressCount => Vec::new(),
                        _ => progress,
                    },
                    performance: RequestPerformance::default(),
                    overall_success: success,
                    canceled,
                    status,
                };
                if !matches!(script, Script::DropSender) {
                    let _ = on_complete.send(completion);
                }
            });
            Ok(RequestIdentity::new())
        }

        fn prepare_with_progress(
            &self,
            session: SessionContext,
            filesystem: &FileSystemDescriptor,
            relative_names: Vec<String>,
            on_progress: ProgressSink,
            on_complete: CompletionSender,
        ) -> Result<RequestIdentity, CacheError> {
            if let Script::FailAfterProgress = self.script {
                *self.on_progress.lock() = Some(on_progress);
            }
            self.prepare(session, filesystem, relative_names, on_complete)
        }

        fn cancel(&self, _request: &RequestIdentity, _async_cancel: bool) -> Result<(), CacheError> {
            Ok(())
        }
    }

    fn setup(
        script: Script,
    ) -> (ContinuationCoordinator, Arc<ScriptedDownloader>, Arc<ManagedFile>) {
        let backend = MockDiskBackend::new();
        let ctx = ManagedFileContext {
            resolver: Arc::new(PathResolver::new("/cache")),
            backend: Arc::new(backend.clone()),
            min_resync_interval: Duration::from_millis(100),
        };
        let downloader = Arc::new(ScriptedDownloader::new(script, backend));
        let coordinator = ContinuationCoordinator::new(downloader.clone());
        (coordinator, downloader, Arc::new(ManagedFile::new(FILE, &ctx)))
    }

    #[test]
    fn test_successful_download_makes_file_idle() {
        let (coordinator, downloader, file) = setup(Script::Succeed);

        let outcome = coordinator.continuation_for(&file);

        assert!(matches!(outcome, ContinuationOutcome::Ready));
        assert_eq!(file.state(), FileState::Idle);
        assert_eq!(file.estimated_size(), 64);
        let requests = downloader.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0.host, "nn");
        assert_eq!(requests[0].1, vec!["dir/file".to_string()]);
    }

    // Test: failed completion forbids the file and starts the resync backoff
    #[test]
    fn test_failed_download_forbids_file_until_backoff_elapses() {
        let (coordinator, _, file) = setup(Script::Fail);

        let outcome = coordinator.continuation_for(&file);

        assert!(matches!(outcome, ContinuationOutcome::Forbidden));
        assert_eq!(file.state(), FileState::Forbidden);
        assert!(!file.should_try_resync());
        thread::sleep(Duration::from_millis(150));
        assert!(file.should_try_resync());
    }

    // Test: bytes reported mid-download are given back when the sync fails
    #[test]
    fn test_failed_download_resets_reported_size() {
        let (coordinator, _, _) = setup(Script::FailAfterProgress);
        let deltas = Arc::new(Mutex::new(Vec::new()));
        let recorder = deltas.clone();
        let ctx = ManagedFileContext {
            resolver: Arc::new(PathResolver::new("/cache")),
            backend: Arc::new(MockDiskBackend::new()),
            min_resync_interval: Duration::from_millis(100),
        };
        let file = Arc::new(ManagedFile::with_weight_callback(
            FILE,
            &ctx,
            Box::new(move |delta: i64| recorder.lock().push(delta)),
        ));

        let outcome = coordinator.continuation_for(&file);

        assert!(matches!(outcome, ContinuationOutcome::Forbidden));
        assert_eq!(file.state(), FileState::Forbidden);
        assert_eq!(*deltas.lock(), vec![64, -64]);
        assert_eq!(file.estimated_size(), 0);
    }

    #[test]
    fn test_structural_errors_forbid_file() {
        for script in [
            Script::Cancel,
            Script::WrongProgressCount,
            Script::SuccessNotDone,
            Script::ForeignSession,
            Script::DropSender,
        ] {
            let (coordinator, _, file) = setup(script);
            let outcome = coordinator.continuation_for(&file);
            assert!(matches!(outcome, ContinuationOutcome::Forbidden));
            assert_eq!(file.state(), FileState::Forbidden);
        }
    }

    #[test]
    fn test_unschedulable_request_leaves_file_in_sync() {
        let (coordinator, _, file) = setup(Script::RefuseToSchedule);

        match coordinator.continuation_for(&file) {
            ContinuationOutcome::NotScheduled(e) => {
                assert!(matches!(e, CacheError::NamenodeUnreachable(_)))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(file.state(), FileState::InUseBySync);
    }

    #[test]
    fn test_forbidden_file_is_retried_only_after_backoff() {
        let (coordinator, downloader, file) = setup(Script::Succeed);
        file.set_state(FileState::InUseBySync);
        file.set_state(FileState::Forbidden);

        assert!(matches!(
            coordinator.continuation_for(&file),
            ContinuationOutcome::Skipped
        ));
        assert!(downloader.requests.lock().is_empty());

        thread::sleep(Duration::from_millis(150));
        assert!(matches!(
            coordinator.continuation_for(&file),
            ContinuationOutcome::Ready
        ));
        assert_eq!(file.state(), FileState::Idle);
    }

    #[test]
    fn test_invalid_or_busy_file_is_skipped() {
        let (coordinator, downloader, file) = setup(Script::Succeed);
        file.mark_for_deletion();
        assert!(matches!(
            coordinator.continuation_for(&file),
            ContinuationOutcome::Skipped
        ));

        let (coordinator, _, file) = setup(Script::Succeed);
        assert!(file.begin_sync());
        assert!(matches!(
            coordinator.continuation_for(&file),
            ContinuationOutcome::Skipped
        ));
        assert!(downloader.requests.lock().is_empty());
    }

    #[test]
    fn test_subscriber_is_woken_by_resolution() {
        let (coordinator, _, file) = setup(Script::Succeed);
        let coordinator_file = file.clone();
        let worker = thread::spawn(move || coordinator.continuation_for(&coordinator_file));

        while file.state() != FileState::InUseBySync && !worker.is_finished() {
            thread::yield_now();
        }
        assert_eq!(file.wait_until_settled(), FileState::Idle);
        assert!(matches!(worker.join().unwrap(), ContinuationOutcome::Ready));
    }

    #[test]
    fn test_verify_completion_order() {
        let session = SessionContext::new();
        let mut completion = PrepareCompletion {
            session,
            progress: vec![FileProgress {
                relative_name: "f".into(),
                done: true,
                ..Default::default()
            }],
            performance: RequestPerformance::default(),
            overall_success: true,
            canceled: false,
            status: TaskOverallStatus::CompletedOk,
        };
        assert!(verify_completion(&session, 1, &completion).is_ok());

        completion.overall_success = false;
        completion.status = TaskOverallStatus::Failure;
        assert!(matches!(
            verify_completion(&session, 1, &completion),
            Err(CacheError::RequestFailed(_))
        ));
        assert!(matches!(
            verify_completion(&session, 2, &completion),
            Err(CacheError::Consistency(_))
        ));
    }
}
