//! Worker side of the download subsystem
//!
//! Everything here is blocking I/O; the manager runs it on tokio's
//! blocking pool.

use crate::constants::PARTIAL_FILE_SUFFIX;
use crate::dfs::{FileSystemDescriptor, NamenodeBound, NamenodeRegistry, PathResolver, PooledConnection};
use crate::error::CacheError;
use crate::sync::task::PrepareTask;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Copies remote files into the local cache layout
pub struct SyncModule {
    registry: Arc<NamenodeRegistry>,
    resolver: Arc<PathResolver>,
    chunk_size: usize,
    throughput_bytes_per_sec: u64,
}

impl SyncModule {
    pub fn new(
        registry: Arc<NamenodeRegistry>,
        resolver: Arc<PathResolver>,
        chunk_size: usize,
        throughput_bytes_per_sec: u64,
    ) -> Self {
        Self {
            registry,
            resolver,
            chunk_size: chunk_size.max(1),
            throughput_bytes_per_sec: throughput_bytes_per_sec.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<NamenodeRegistry> {
        &self.registry
    }

    fn connect(
        &self,
        filesystem: &FileSystemDescriptor,
    ) -> Result<(Arc<NamenodeBound>, PooledConnection), CacheError> {
        let namenode = self
            .registry
            .namenode(filesystem)
            .ok_or_else(|| CacheError::NamenodeNotConfigured(filesystem.to_string()))?;
        let connection = namenode.pool().get_free_connection();
        if !connection.valid() {
            return Err(CacheError::NamenodeUnreachable(filesystem.to_string()));
        }
        Ok((namenode, connection))
    }

    /// Download one file into its local cache path
    ///
    /// Data is streamed in chunks into a `.part` file next to the target and
    /// renamed into place once complete. Cancellation is checked before
    /// every chunk. On every exit the task is acknowledged, and on failure
    /// its progress carries the error and no `.part` file is left behind.
    pub fn prepare_file(
        &self,
        filesystem: &FileSystemDescriptor,
        relative: &str,
        task: &PrepareTask,
    ) -> Result<u64, CacheError> {
        let _ack = task.cancellation().finish_on_drop();

        let target = self.resolver.construct_local_path(filesystem, relative);
        let partial = partial_path(&target);

        match self.fetch_into(filesystem, relative, &target, &partial, task) {
            Ok(bytes) => {
                task.mark_done();
                info!(
                    filesystem = %filesystem,
                    relative = relative,
                    bytes = bytes,
                    "File prepared locally"
                );
                Ok(bytes)
            }
            Err(e) => {
                if partial.exists() {
                    if let Err(remove_err) = fs::remove_file(&partial) {
                        warn!(
                            path = %partial.display(),
                            error = %remove_err,
                            "Failed to remove partial file"
                        );
                    }
                }
                match &e {
                    CacheError::Canceled => {
                        info!(relative = relative, "File preparation canceled")
                    }
                    other => warn!(relative = relative, error = %other, "File preparation failed"),
                }
                task.mark_failed(e.to_string());
                Err(e)
            }
        }
    }

    fn fetch_into(
        &self,
        filesystem: &FileSystemDescriptor,
        relative: &str,
        target: &Path,
        partial: &Path,
        task: &PrepareTask,
    ) -> Result<u64, CacheError> {
        if task.cancellation().is_canceled() {
            return Err(CacheError::Canceled);
        }

        let (namenode, connection) = self.connect(filesystem)?;
        let adaptor = namenode.adaptor();

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        match adaptor.size(&connection, relative) {
            Ok(size) => task.set_estimate(size, self.transfer_time(size)),
            Err(e) => debug!(relative = relative, error = %e, "Remote size unavailable"),
        }

        let reader = adaptor.open(&connection, relative)?;
        let bytes = self.copy_chunks(reader, partial, task)?;
        fs::rename(partial, target)?;
        Ok(bytes)
    }

    fn copy_chunks(
        &self,
        mut reader: Box<dyn Read + Send>,
        partial: &Path,
        task: &PrepareTask,
    ) -> Result<u64, CacheError> {
        let mut writer = BufWriter::new(File::create(partial)?);
        let mut buf = vec![0u8; self.chunk_size];
        let mut local_bytes = 0u64;

        loop {
            if task.cancellation().is_canceled() {
                return Err(CacheError::Canceled);
            }
            let read = reader.read(&mut buf)?;
            if read == 0 {
                break;
            }
            writer.write_all(&buf[..read])?;
            local_bytes += read as u64;
            task.set_local_bytes(local_bytes);
        }

        writer.flush()?;
        Ok(local_bytes)
    }

    /// Record the remote size and the expected transfer time on the task
    pub fn estimate_time_to_get_file_locally(
        &self,
        filesystem: &FileSystemDescriptor,
        relative: &str,
        task: &PrepareTask,
    ) -> Result<Duration, CacheError> {
        let (namenode, connection) = self.connect(filesystem)?;
        let size = namenode.adaptor().size(&connection, relative)?;
        let time = self.transfer_time(size);
        task.set_estimate(size, time);
        Ok(time)
    }

    fn transfer_time(&self, bytes: u64) -> Duration {
        Duration::from_secs_f64(bytes as f64 / self.throughput_bytes_per_sec as f64)
    }

    /// Cancel a running preparation
    pub fn cancel_file_make_progress(&self, async_cancel: bool, task: &PrepareTask) {
        task.cancellation().cancel(async_cancel);
    }

    /// Verify cached files against their remote origin
    pub fn validate_local_cache(&self) -> Result<(), CacheError> {
        Err(CacheError::NotImplemented("local cache validation"))
    }
}

/// Temporary path a download is written to before the final rename
pub fn partial_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_owned();
    name.push(PARTIAL_FILE_SUFFIX);
    PathBuf::from(name)
}
