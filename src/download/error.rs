//! Error types for the download module.
//!
//! This module defines structured errors for all download operations,
//! providing context-rich error messages for debugging and user feedback.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed transport error produced by a [`Fetcher`](super::Fetcher) implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur during file downloads.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The fetch boundary returned something that is not a protocol response.
    #[error("invalid response downloading {url}: {reason}")]
    InvalidResponse {
        /// The URL being downloaded.
        url: String,
        /// What was wrong with the response.
        reason: String,
    },

    /// HTTP response with a non-success status code.
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Transport-level error (DNS resolution, connection refused, broken body stream, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// No explicit file name was given and none could be derived from the URL.
    #[error("no usable file name for {url}")]
    EmptyFileName {
        /// The source URL.
        url: String,
    },

    /// The destination directory path exists but is not a directory.
    #[error("destination {path} exists and is not a directory")]
    DestinationNotDirectory {
        /// The colliding path.
        path: PathBuf,
    },

    /// A file already exists at the final path and overwriting is disabled.
    #[error("destination file {path} already exists")]
    DestinationExists {
        /// The existing file path.
        path: PathBuf,
    },

    /// The destination directory could not be created.
    #[error("failed to prepare directory {path}: {source}")]
    DirectoryPrepFailed {
        /// The directory that could not be created.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// File system error while streaming or finalizing.
    #[error("IO error writing to {path}: {source}")]
    WriteFailed {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The download was cancelled at a cancellation checkpoint.
    #[error("download of {url} was cancelled")]
    Cancelled {
        /// The URL being downloaded.
        url: String,
    },
}

impl DownloadError {
    /// Creates an invalid response error.
    pub fn invalid_response(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResponse {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a network error from any transport error.
    pub fn network(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Network {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an empty file name error.
    pub fn empty_file_name(url: impl Into<String>) -> Self {
        Self::EmptyFileName { url: url.into() }
    }

    /// Creates a destination-not-a-directory error.
    pub fn destination_not_directory(path: impl Into<PathBuf>) -> Self {
        Self::DestinationNotDirectory { path: path.into() }
    }

    /// Creates a destination-exists error.
    pub fn destination_exists(path: impl Into<PathBuf>) -> Self {
        Self::DestinationExists { path: path.into() }
    }

    /// Creates a directory preparation error.
    pub fn directory_prep_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::DirectoryPrepFailed {
            path: path.into(),
            source,
        }
    }

    /// Creates a write error.
    pub fn write_failed(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFailed {
            path: path.into(),
            source,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Returns whether this error is worth another attempt.
    ///
    /// See [`classify_error`](super::classify_error) for the full table.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        super::classify_error(self) == super::FailureType::Transient
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs
// context (url, path) the source errors don't carry.
