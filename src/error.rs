// Error types module

use thiserror::Error;

/// Broad class of a [`CacheError`], used for logging and metrics labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Namenode is not configured
    Configuration,
    /// Remote side is unreachable or the pool handed out an invalid connection
    Connectivity,
    /// The prepare request could not be enqueued
    Scheduling,
    /// The download ran but finished with a failure
    RemoteExecution,
    /// Completion data did not match the request
    Consistency,
    /// Explicit stub for unfinished functionality
    NotImplemented,
    /// Local filesystem failure
    Io,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Connectivity => "connectivity",
            ErrorCategory::Scheduling => "scheduling",
            ErrorCategory::RemoteExecution => "remote_execution",
            ErrorCategory::Consistency => "consistency",
            ErrorCategory::NotImplemented => "not_implemented",
            ErrorCategory::Io => "io",
        }
    }
}

/// Centralized error type for the cache core and the sync layer
///
/// No variant is fatal: every operation reports its outcome through this
/// type and the worst consequence is a file staying FORBIDDEN until its
/// resync backoff elapses.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Namenode is not configured: {0}")]
    NamenodeNotConfigured(String),

    #[error("DFS namenode is not reachable: {0}")]
    NamenodeUnreachable(String),

    #[error("Failed to schedule request: {0}")]
    SchedulingFailed(String),

    #[error("Unknown request: {0}")]
    UnknownRequest(String),

    #[error("Remote request failed: {0}")]
    RequestFailed(String),

    #[error("Operation was canceled")]
    Canceled,

    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("File is forbidden: {0}")]
    Forbidden(String),

    #[error("Not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CacheError::NamenodeNotConfigured(_) => ErrorCategory::Configuration,
            CacheError::NamenodeUnreachable(_) => ErrorCategory::Connectivity,
            CacheError::SchedulingFailed(_) | CacheError::UnknownRequest(_) => {
                ErrorCategory::Scheduling
            }
            CacheError::RequestFailed(_) | CacheError::Canceled | CacheError::Forbidden(_) => {
                ErrorCategory::RemoteExecution
            }
            CacheError::Consistency(_) => ErrorCategory::Consistency,
            CacheError::NotImplemented(_) => ErrorCategory::NotImplemented,
            CacheError::Io(_) => ErrorCategory::Io,
        }
    }
}
