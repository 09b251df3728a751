//! Cooperative cancellation shared by a requester and one worker

use crate::sync::{FileProgress, ProgressSink};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct TaskFlags {
    canceled: bool,
    finished: bool,
}

/// Cancellation flag plus acknowledgment, guarded by one mutex/condvar pair
///
/// The requester calls [`cancel`](Self::cancel); the worker polls
/// [`is_canceled`](Self::is_canceled) between units of work and calls
/// [`finish`](Self::finish) on every exit path.
#[derive(Debug, Default)]
pub struct CancellableTask {
    flags: Mutex<TaskFlags>,
    changed: Condvar,
}

impl CancellableTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    ///
    /// With `async_cancel` false, blocks until the worker acknowledges by
    /// finishing. A worker that already finished acknowledges immediately.
    pub fn cancel(&self, async_cancel: bool) {
        let mut flags = self.flags.lock();
        flags.canceled = true;
        if async_cancel {
            return;
        }
        while !flags.finished {
            self.changed.wait(&mut flags);
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.flags.lock().canceled
    }

    pub fn is_finished(&self) -> bool {
        self.flags.lock().finished
    }

    /// Worker side: mark the task finished and wake a blocked canceller
    pub fn finish(&self) {
        let mut flags = self.flags.lock();
        flags.finished = true;
        self.changed.notify_all();
    }

    /// Guard calling [`finish`](Self::finish) when dropped
    pub fn finish_on_drop(&self) -> FinishGuard<'_> {
        FinishGuard { task: self }
    }
}

/// Acknowledges a [`CancellableTask`] on every exit path of a worker
pub struct FinishGuard<'a> {
    task: &'a CancellableTask,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.task.finish();
    }
}

/// Download of one file: cancellation plus progress
pub struct PrepareTask {
    cancellation: CancellableTask,
    relative_name: String,
    progress: Mutex<FileProgress>,
    on_progress: Option<ProgressSink>,
    reported: AtomicU64,
}

impl PrepareTask {
    pub fn new(relative_name: impl Into<String>) -> Self {
        Self::build(relative_name.into(), None)
    }

    /// Same as [`new`](Self::new), reporting the expected size to `sink`
    pub fn with_progress_sink(relative_name: impl Into<String>, sink: ProgressSink) -> Self {
        Self::build(relative_name.into(), Some(sink))
    }

    fn build(relative_name: String, on_progress: Option<ProgressSink>) -> Self {
        Self {
            cancellation: CancellableTask::new(),
            progress: Mutex::new(FileProgress {
                relative_name: relative_name.clone(),
                ..Default::default()
            }),
            relative_name,
            on_progress,
            reported: AtomicU64::new(0),
        }
    }

    pub fn cancellation(&self) -> &CancellableTask {
        &self.cancellation
    }

    pub fn relative_name(&self) -> String {
        self.relative_name.clone()
    }

    pub fn progress(&self) -> FileProgress {
        self.progress.lock().clone()
    }

    pub fn set_estimate(&self, bytes: u64, time: Duration) {
        let expected = {
            let mut progress = self.progress.lock();
            progress.estimated_bytes = Some(bytes);
            progress.estimated_time = Some(time);
            expected_bytes(&progress)
        };
        self.report(expected);
    }

    pub fn set_local_bytes(&self, bytes: u64) {
        let expected = {
            let mut progress = self.progress.lock();
            progress.local_bytes = bytes;
            expected_bytes(&progress)
        };
        self.report(expected);
    }

    // Called without the progress lock; the sink may take cache locks.
    fn report(&self, expected: u64) {
        let Some(sink) = &self.on_progress else {
            return;
        };
        if self.reported.swap(expected, Ordering::AcqRel) != expected {
            sink(&self.relative_name, expected);
        }
    }

    pub fn mark_done(&self) {
        self.progress.lock().done = true;
    }

    pub fn mark_failed(&self, error: impl Into<String>) {
        let error = error.into();
        debug!(error = %error, "Prepare task failed");
        self.progress.lock().error = Some(error);
    }
}

impl fmt::Debug for PrepareTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrepareTask")
            .field("cancellation", &self.cancellation)
            .field("progress", &*self.progress.lock())
            .finish_non_exhaustive()
    }
}

fn expected_bytes(progress: &FileProgress) -> u64 {
    progress
        .estimated_bytes
        .unwrap_or(0)
        .max(progress.local_bytes)
}
