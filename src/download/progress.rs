//! Progress reporting for streamed downloads.

use std::sync::Arc;

use serde::Serialize;

/// Snapshot of a single download's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    /// Bytes written to the temporary file so far.
    pub bytes_received: u64,
    /// Server-declared length, when known.
    pub total_bytes_expected: Option<u64>,
}

impl DownloadProgress {
    /// Creates a progress snapshot.
    #[must_use]
    pub fn new(bytes_received: u64, total_bytes_expected: Option<u64>) -> Self {
        Self {
            bytes_received,
            total_bytes_expected,
        }
    }

    /// Fraction of the declared total received so far.
    ///
    /// `None` when the total is unknown or zero. Clamped to `1.0` when more
    /// bytes arrived than the server declared.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction_completed(&self) -> Option<f64> {
        let total = self.total_bytes_expected.filter(|total| *total > 0)?;
        Some((self.bytes_received as f64 / total as f64).min(1.0))
    }
}

/// Caller-supplied progress callback.
///
/// Invoked synchronously on whatever task drives the download, in strictly
/// increasing `bytes_received` order for that download. No marshaling onto a
/// particular thread happens; callers touching shared state must synchronize.
pub type ProgressCallback = Arc<dyn Fn(DownloadProgress) + Send + Sync>;
