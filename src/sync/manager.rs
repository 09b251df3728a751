//! Cache manager: schedules downloads on a tokio runtime
//!
//! `prepare` returns as soon as the request is scheduled. Each relative
//! name becomes a [`PrepareTask`] run on the blocking pool, with a
//! semaphore bounding how many files download at once. When the last task
//! of a request finishes the completion is sent exactly once.

use crate::dfs::{FileSystemDescriptor, NamenodeRegistry};
use crate::error::CacheError;
use crate::metrics::CacheMetrics;
use crate::sync::module::SyncModule;
use crate::sync::task::PrepareTask;
use crate::sync::{
    CompletionSender, DownloadSubsystem, PrepareCompletion, ProgressSink, RequestIdentity,
    RequestPerformance, SessionContext, TaskOverallStatus,
};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

type InFlight = Arc<Mutex<HashMap<RequestIdentity, Vec<Arc<PrepareTask>>>>>;

enum FileOutcome {
    Done(u64),
    Failed,
    Canceled,
}

/// Download subsystem backed by a [`SyncModule`]
pub struct CacheManager {
    runtime: Handle,
    sync: Arc<SyncModule>,
    permits: Arc<Semaphore>,
    in_flight: InFlight,
}

impl CacheManager {
    pub fn new(runtime: Handle, sync: Arc<SyncModule>, download_concurrency: usize) -> Self {
        Self {
            runtime,
            sync,
            permits: Arc::new(Semaphore::new(download_concurrency.max(1))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<NamenodeRegistry> {
        self.sync.registry()
    }

    /// Number of requests scheduled and not yet completed
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Cancel every task of an in-flight request
    pub fn cancel_request(
        &self,
        request: &RequestIdentity,
        async_cancel: bool,
    ) -> Result<(), CacheError> {
        let tasks = self
            .in_flight
            .lock()
            .get(request)
            .cloned()
            .ok_or_else(|| CacheError::UnknownRequest(request.to_string()))?;

        info!(
            request = %request,
            files = tasks.len(),
            async_cancel = async_cancel,
            "Canceling prepare request"
        );
        for task in &tasks {
            self.sync.cancel_file_make_progress(async_cancel, task);
        }
        Ok(())
    }

    async fn run_task(
        sync: Arc<SyncModule>,
        permits: Arc<Semaphore>,
        filesystem: FileSystemDescriptor,
        task: Arc<PrepareTask>,
    ) -> (FileOutcome, Duration) {
        let started = Instant::now();
        let _permit = match permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                task.mark_failed("download pool closed");
                task.cancellation().finish();
                return (FileOutcome::Failed, started.elapsed());
            }
        };

        let worker_task = task.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let relative = worker_task.relative_name();
            sync.prepare_file(&filesystem, &relative, &worker_task)
        })
        .await;

        let outcome = match joined {
            Ok(Ok(bytes)) => FileOutcome::Done(bytes),
            Ok(Err(CacheError::Canceled)) => FileOutcome::Canceled,
            Ok(Err(_)) => FileOutcome::Failed,
            Err(e) => {
                error!(error = %e, "Download worker panicked");
                task.mark_failed(e.to_string());
                task.cancellation().finish();
                FileOutcome::Failed
            }
        };
        (outcome, started.elapsed())
    }
}

impl CacheManager {
    fn schedule(
        &self,
        session: SessionContext,
        filesystem: &FileSystemDescriptor,
        relative_names: Vec<String>,
        on_progress: Option<ProgressSink>,
        on_complete: CompletionSender,
    ) -> Result<RequestIdentity, CacheError> {
        let namenode = self
            .registry()
            .namenode(filesystem)
            .ok_or_else(|| CacheError::NamenodeNotConfigured(filesystem.to_string()))?;
        if !namenode.pool().is_reachable() {
            return Err(CacheError::NamenodeUnreachable(filesystem.to_string()));
        }
        if relative_names.is_empty() {
            return Err(CacheError::SchedulingFailed("no files to prepare".to_string()));
        }

        let request = RequestIdentity::new();
        let tasks: Vec<Arc<PrepareTask>> = relative_names
            .iter()
            .map(|name| {
                Arc::new(match &on_progress {
                    Some(sink) => PrepareTask::with_progress_sink(name.clone(), sink.clone()),
                    None => PrepareTask::new(name.clone()),
                })
            })
            .collect();
        self.in_flight.lock().insert(request, tasks.clone());

        debug!(
            session = %session,
            request = %request,
            filesystem = %filesystem,
            files = tasks.len(),
            "Prepare request scheduled"
        );

        let sync = self.sync.clone();
        let permits = self.permits.clone();
        let in_flight = self.in_flight.clone();
        let filesystem = filesystem.clone();

        self.runtime.spawn(async move {
            let started = Instant::now();
            let workers = tasks.iter().map(|task| {
                Self::run_task(
                    sync.clone(),
                    permits.clone(),
                    filesystem.clone(),
                    task.clone(),
                )
            });
            let results = join_all(workers).await;
            in_flight.lock().remove(&request);

            let mut performance = RequestPerformance {
                elapsed: started.elapsed(),
                ..Default::default()
            };
            let mut failed = 0usize;
            let mut canceled = false;
            for (outcome, duration) in &results {
                performance.file_durations.push(*duration);
                match outcome {
                    FileOutcome::Done(bytes) => performance.bytes_transferred += bytes,
                    FileOutcome::Failed => failed += 1,
                    FileOutcome::Canceled => canceled = true,
                }
            }

            let status = if canceled {
                TaskOverallStatus::Canceled
            } else if failed > 0 {
                TaskOverallStatus::Failure
            } else {
                TaskOverallStatus::CompletedOk
            };

            let metrics = CacheMetrics::global();
            metrics.record_download(status, performance.bytes_transferred);

            info!(
                request = %request,
                status = %status,
                files = results.len(),
                failed = failed,
                bytes = performance.bytes_transferred,
                elapsed_ms = performance.elapsed.as_millis() as u64,
                "Prepare request completed"
            );

            let completion = PrepareCompletion {
                session,
                progress: tasks.iter().map(|task| task.progress()).collect(),
                performance,
                overall_success: status == TaskOverallStatus::CompletedOk,
                canceled,
                status,
            };
            if on_complete.send(completion).is_err() {
                warn!(request = %request, "Prepare completion receiver dropped");
            }
        });

        Ok(request)
    }
}

impl DownloadSubsystem for CacheManager {
    fn prepare(
        &self,
        session: SessionContext,
        filesystem: &FileSystemDescriptor,
        relative_names: Vec<String>,
        on_complete: CompletionSender,
    ) -> Result<RequestIdentity, CacheError> {
        self.schedule(session, filesystem, relative_names, None, on_complete)
    }

    fn prepare_with_progress(
        &self,
        session: SessionContext,
        filesystem: &FileSystemDescriptor,
        relative_names: Vec<String>,
        on_progress: ProgressSink,
        on_complete: CompletionSender,
    ) -> Result<RequestIdentity, CacheError> {
        self.schedule(
            session,
            filesystem,
            relative_names,
            Some(on_progress),
            on_complete,
        )
    }

    fn cancel(&self, request: &RequestIdentity, async_cancel: bool) -> Result<(), CacheError> {
        self.cancel_request(request, async_cancel)
    }
}
