//! Stream Downloader Library
//!
//! This library fetches remote resources over HTTP(S) and streams them to
//! local storage without holding the payload in memory, retrying transient
//! failures with backoff and tracking in-flight downloads so callers can
//! enumerate or cancel them.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Retry policy, destination resolution, chunked persistence,
//!   the active download registry and the engine facade
//! - [`config`] - File-backed configuration for engine and retry defaults

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use config::{BackoffKind, ConfigError, FileConfig, LoadedConfig};
pub use download::{
    ActiveDownloadDescriptor, ActiveDownloadRegistry, Backoff, DEFAULT_CHUNK_SIZE,
    DEFAULT_MAX_ATTEMPTS, DestinationResolver, DownloadDestination, DownloadEngine,
    DownloadError, DownloadId, DownloadProgress, DownloadRequest, DownloadTask, EngineSettings,
    FailureType, FetchResponse, Fetcher, HttpFetcher, LocalStorage, ProgressCallback,
    RegistryError, RetryConfigError, RetryConfiguration, RetryDecision, RetryPolicy, Storage,
    StreamPersister, classify_error,
};
