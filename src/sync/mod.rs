//! Download subsystem
//!
//! The cache never fetches files itself. On a miss it hands the download
//! subsystem a set of relative names and a oneshot sender, and the
//! subsystem delivers exactly one [`PrepareCompletion`] over it once every
//! file is done, failed, or canceled.
//!
//! - [`task`]: per-file task with cooperative cancellation
//! - [`module`]: synchronous worker side (chunked copy from the remote)
//! - [`manager`]: tokio-driven [`DownloadSubsystem`] implementation

pub mod manager;
pub mod module;
pub mod task;

pub use manager::CacheManager;
pub use module::SyncModule;
pub use task::{CancellableTask, PrepareTask};

use crate::dfs::FileSystemDescriptor;
use crate::error::CacheError;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Identity of one caller-side prepare session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionContext(Uuid);

impl SessionContext {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity the download subsystem assigns to a scheduled request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestIdentity(Uuid);

impl RequestIdentity {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Progress of a single file within a request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FileProgress {
    pub relative_name: String,
    /// Bytes written locally so far
    pub local_bytes: u64,
    /// Remote size, when known
    pub estimated_bytes: Option<u64>,
    pub estimated_time: Option<Duration>,
    pub done: bool,
    pub error: Option<String>,
}

/// Timing and volume of a whole request
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RequestPerformance {
    pub elapsed: Duration,
    pub bytes_transferred: u64,
    /// Wall time per file, in request order
    pub file_durations: Vec<Duration>,
}

impl RequestPerformance {
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.bytes_transferred as f64 / secs
        }
    }
}

/// Overall status of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOverallStatus {
    CompletedOk,
    Failure,
    Canceled,
}

impl TaskOverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOverallStatus::CompletedOk => "completed_ok",
            TaskOverallStatus::Failure => "failure",
            TaskOverallStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskOverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion delivered once per prepare request
#[derive(Debug, Clone)]
pub struct PrepareCompletion {
    pub session: SessionContext,
    pub progress: Vec<FileProgress>,
    pub performance: RequestPerformance,
    pub overall_success: bool,
    pub canceled: bool,
    pub status: TaskOverallStatus,
}

/// Sending half handed to [`DownloadSubsystem::prepare`]
pub type CompletionSender = oneshot::Sender<PrepareCompletion>;

/// Called with `(relative_name, bytes)` whenever the expected local size of
/// a file grows: the remote size once known, or the bytes written so far
/// if they exceed it
pub type ProgressSink = Arc<dyn Fn(&str, u64) + Send + Sync>;

/// Contract the cache needs from whatever performs remote reads
pub trait DownloadSubsystem: Send + Sync {
    /// Schedule the download of `relative_names` from `filesystem`
    ///
    /// `Ok` means the request was scheduled and `on_complete` will receive
    /// exactly one completion. `Err` means nothing was scheduled and the
    /// sender has been dropped.
    fn prepare(
        &self,
        session: SessionContext,
        filesystem: &FileSystemDescriptor,
        relative_names: Vec<String>,
        on_complete: CompletionSender,
    ) -> Result<RequestIdentity, CacheError>;

    /// [`prepare`](Self::prepare), also reporting sizes to `on_progress`
    /// while files download
    ///
    /// The sink is called from worker threads and never after the
    /// completion was sent. Subsystems that cannot report progress keep
    /// this default, which ignores the sink.
    fn prepare_with_progress(
        &self,
        session: SessionContext,
        filesystem: &FileSystemDescriptor,
        relative_names: Vec<String>,
        _on_progress: ProgressSink,
        on_complete: CompletionSender,
    ) -> Result<RequestIdentity, CacheError> {
        self.prepare(session, filesystem, relative_names, on_complete)
    }

    /// Cancel every file of an in-flight request
    ///
    /// With `async_cancel` false, blocks until all workers acknowledged.
    fn cancel(&self, request: &RequestIdentity, async_cancel: bool) -> Result<(), CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identities_are_unique() {
        assert_ne!(SessionContext::new(), SessionContext::new());
        assert_ne!(RequestIdentity::new(), RequestIdentity::new());
    }

    #[test]
    fn test_throughput() {
        let perf = RequestPerformance {
            elapsed: Duration::from_secs(2),
            bytes_transferred: 100,
            file_durations: vec![],
        };
        assert_eq!(perf.throughput_bytes_per_sec(), 50.0);
        assert_eq!(RequestPerformance::default().throughput_bytes_per_sec(), 0.0);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(TaskOverallStatus::CompletedOk.to_string(), "completed_ok");
        assert_eq!(TaskOverallStatus::Canceled.as_str(), "canceled");
    }
}
