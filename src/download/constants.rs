//! Constants for the download module (timeouts, chunking, retry defaults).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default overall HTTP request timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Bytes accumulated in memory before a write to the temporary file (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default maximum attempts, including the initial one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default first backoff delay for exponential backoff.
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Default exponential backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default cap applied to exponential backoff delays.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(8);

/// Suffix appended to in-progress temporary files.
pub const TEMP_FILE_SUFFIX: &str = "part";
