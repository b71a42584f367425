//! Streaming download engine.
//!
//! This module fetches remote resources and streams them to local storage
//! without buffering whole payloads in memory.
//!
//! # Features
//!
//! - Streaming persistence through a uniquely named temporary file, published
//!   with an atomic rename
//! - Retry with none, constant or capped exponential backoff
//! - Progress reporting per persisted chunk
//! - Registry of in-flight downloads with cooperative cancellation
//! - Structured error types with full context
//!
//! # Example
//!
//! ```no_run
//! use stream_downloader::download::{
//!     Backoff, DownloadDestination, DownloadEngine, DownloadRequest, EngineSettings,
//!     RetryConfiguration,
//! };
//! use std::time::Duration;
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DownloadEngine::http(&EngineSettings::default())?;
//! let request = DownloadRequest::new(
//!     Url::parse("https://example.com/data.csv")?,
//!     DownloadDestination::new("./downloads").overwrite(true),
//! )
//! .retry(RetryConfiguration::new(5, Backoff::Constant(Duration::from_secs(1)))?);
//!
//! let task = engine.spawn(request)?;
//! println!("started {}", task.id());
//! let path = task.join().await?;
//! println!("Downloaded: {}", path.display());
//! # Ok(())
//! # }
//! ```

pub(crate) mod constants;
mod destination;
mod engine;
mod error;
mod fetch;
mod persister;
mod progress;
mod registry;
mod retry;
mod storage;

pub use constants::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ATTEMPTS};
pub use destination::{DestinationResolver, DownloadDestination};
pub use engine::{DownloadEngine, DownloadRequest, DownloadTask, EngineSettings};
pub use error::{BoxError, DownloadError};
pub use fetch::{ByteStream, FetchResponse, Fetcher, HttpFetcher};
pub use persister::StreamPersister;
pub use progress::{DownloadProgress, ProgressCallback};
pub use registry::{
    ActiveDownloadDescriptor, ActiveDownloadRegistry, DownloadId, Registration, RegistryError,
};
pub use retry::{
    Backoff, FailureType, RetryConfigError, RetryConfiguration, RetryDecision, RetryPolicy,
    classify_error,
};
pub use storage::{EntryKind, FileWriter, LocalStorage, Storage};
