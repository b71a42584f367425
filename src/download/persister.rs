//! Chunked streaming persistence with atomic publish.
//!
//! [`StreamPersister`] writes a response body to a private temporary file in
//! the destination's own directory, reporting progress after every chunk,
//! then renames the temporary file onto the final path. The temporary file
//! must share a file system with the final path so the publish step is a
//! rename and never a copy; placing it next to the final path guarantees
//! that. On any failure the temporary file is removed before the error
//! propagates.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

use super::DownloadError;
use super::constants::{DEFAULT_CHUNK_SIZE, TEMP_FILE_SUFFIX};
use super::fetch::ByteStream;
use super::progress::{DownloadProgress, ProgressCallback};
use super::storage::{FileWriter, Storage};

/// Streams bodies to disk through [`Storage`].
#[derive(Clone)]
pub struct StreamPersister {
    storage: Arc<dyn Storage>,
    chunk_size: usize,
}

impl std::fmt::Debug for StreamPersister {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamPersister")
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl StreamPersister {
    /// Creates a persister writing in chunks of `chunk_size` bytes (minimum 1).
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>, chunk_size: usize) -> Self {
        Self {
            storage,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Creates a persister with the default 64 KiB chunk size.
    #[must_use]
    pub fn with_default_chunk_size(storage: Arc<dyn Storage>) -> Self {
        Self::new(storage, DEFAULT_CHUNK_SIZE)
    }

    /// Returns the configured chunk size in bytes.
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Streams `body` into a temporary file and publishes it at `final_path`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// - Errors yielded by `body` itself (network, timeout, cancellation) pass through
    /// - [`DownloadError::DestinationExists`] if a file appeared at `final_path`
    ///   during the transfer and `overwrite` is off
    /// - [`DownloadError::WriteFailed`] for any write, flush, remove or rename failure
    ///
    /// In every error case the temporary file is gone when this returns.
    #[instrument(skip(self, body, on_progress), fields(path = %final_path.display()))]
    pub async fn persist(
        &self,
        mut body: ByteStream,
        expected_length: Option<u64>,
        final_path: &Path,
        overwrite: bool,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<u64, DownloadError> {
        let temp_path = temp_path_for(final_path);
        let writer = self
            .storage
            .create_new(&temp_path)
            .await
            .map_err(|e| DownloadError::write_failed(final_path, e))?;
        let guard = TempFileGuard::new(Arc::clone(&self.storage), temp_path.clone());
        debug!(temp = %temp_path.display(), "streaming to temporary file");

        let result = async {
            let bytes_written = stream_to_file(
                writer,
                &mut body,
                self.chunk_size,
                final_path,
                expected_length,
                on_progress,
            )
            .await?;
            self.publish(&temp_path, final_path, overwrite).await?;
            Ok::<u64, DownloadError>(bytes_written)
        }
        .await;

        match result {
            Ok(bytes_written) => {
                guard.disarm();
                info!(
                    path = %final_path.display(),
                    bytes = bytes_written,
                    "download complete"
                );
                Ok(bytes_written)
            }
            Err(error) => {
                debug!(temp = %temp_path.display(), %error, "cleaning up temporary file after error");
                guard.cleanup().await;
                Err(error)
            }
        }
    }

    /// Moves the finished temporary file onto `final_path`.
    async fn publish(
        &self,
        temp_path: &Path,
        final_path: &Path,
        overwrite: bool,
    ) -> Result<(), DownloadError> {
        let existing = self
            .storage
            .entry_kind(final_path)
            .await
            .map_err(|e| DownloadError::write_failed(final_path, e))?;

        if existing.is_some() {
            if !overwrite {
                return Err(DownloadError::destination_exists(final_path));
            }
            debug!(path = %final_path.display(), "removing existing file before publish");
            self.storage
                .remove_file(final_path)
                .await
                .map_err(|e| DownloadError::write_failed(final_path, e))?;
        }

        self.storage
            .rename(temp_path, final_path)
            .await
            .map_err(|e| DownloadError::write_failed(final_path, e))
    }
}

/// Copies `body` into `writer` through a buffer of at most `chunk_size` bytes.
///
/// Emits one progress event per flushed chunk, plus one for the final
/// partial chunk (or a single zero-byte event for an empty body). Write
/// errors name `final_path`, since the temporary file is gone by the time
/// the caller sees them.
async fn stream_to_file(
    mut writer: FileWriter,
    body: &mut ByteStream,
    chunk_size: usize,
    final_path: &Path,
    expected_length: Option<u64>,
    on_progress: Option<&ProgressCallback>,
) -> Result<u64, DownloadError> {
    let mut buffer: Vec<u8> = Vec::with_capacity(chunk_size);
    let mut bytes_received: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let mut rest: &[u8] = &chunk;
        while !rest.is_empty() {
            let take = (chunk_size - buffer.len()).min(rest.len());
            buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if buffer.len() == chunk_size {
                bytes_received =
                    flush_chunk(&mut writer, &mut buffer, bytes_received, final_path).await?;
                report(on_progress, bytes_received, expected_length);
            }
        }
    }

    if !buffer.is_empty() || bytes_received == 0 {
        bytes_received = flush_chunk(&mut writer, &mut buffer, bytes_received, final_path).await?;
        report(on_progress, bytes_received, expected_length);
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::write_failed(final_path, e))?;
    writer
        .shutdown()
        .await
        .map_err(|e| DownloadError::write_failed(final_path, e))?;

    Ok(bytes_received)
}

async fn flush_chunk(
    writer: &mut FileWriter,
    buffer: &mut Vec<u8>,
    bytes_received: u64,
    final_path: &Path,
) -> Result<u64, DownloadError> {
    writer
        .write_all(buffer.as_slice())
        .await
        .map_err(|e| DownloadError::write_failed(final_path, e))?;
    let total = bytes_received + buffer.len() as u64;
    trace!(chunk = buffer.len(), total, "chunk written");
    buffer.clear();
    Ok(total)
}

fn report(on_progress: Option<&ProgressCallback>, bytes_received: u64, expected: Option<u64>) {
    if let Some(callback) = on_progress {
        callback(DownloadProgress::new(bytes_received, expected));
    }
}

/// Longest prefix of the final name kept in a temporary file name.
///
/// Leaves room for the `.` prefix and `.<uuid>.part` suffix under the
/// common 255-byte file name limit.
const TEMP_NAME_PREFIX_MAX: usize = 128;

/// `.<name>.<uuid>.part` next to `final_path`, with `<name>` cut to
/// [`TEMP_NAME_PREFIX_MAX`] bytes.
fn temp_path_for(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map_or_else(|| "download".into(), |n| n.to_string_lossy());
    final_path.with_file_name(format!(
        ".{}.{}.{TEMP_FILE_SUFFIX}",
        truncate_on_char_boundary(&name, TEMP_NAME_PREFIX_MAX),
        Uuid::new_v4().simple()
    ))
}

fn truncate_on_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Removes the temporary file unless disarmed.
///
/// Explicit [`cleanup`](Self::cleanup) is the normal path. If the owning
/// future is dropped mid-transfer, `Drop` schedules removal on the current
/// Tokio runtime instead.
struct TempFileGuard {
    storage: Arc<dyn Storage>,
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(storage: Arc<dyn Storage>, path: PathBuf) -> Self {
        Self {
            storage,
            path,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn cleanup(mut self) {
        self.armed = false;
        remove_quietly(self.storage.as_ref(), &self.path).await;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let storage = Arc::clone(&self.storage);
        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remove_quietly(storage.as_ref(), &path).await;
                });
            }
            Err(_) => {
                warn!(temp = %path.display(), "no runtime to remove abandoned temporary file");
            }
        }
    }
}

async fn remove_quietly(storage: &dyn Storage, path: &Path) {
    match storage.remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(temp = %path.display(), error = %e, "failed to remove temporary file"),
    }
}
