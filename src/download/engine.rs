//! Download engine facade with retry and cancellation support.
//!
//! This module provides the [`DownloadEngine`], which drives one logical
//! download through its attempts:
//!
//! ```text
//! Idle -> Attempting -> Succeeded
//!                    -> Retrying -> Attempting
//!                    -> Failed
//! ```
//!
//! Each attempt opens a fetch, validates the status, resolves the destination
//! and streams the body through the [`StreamPersister`]. The whole logical
//! download is registered with the [`ActiveDownloadRegistry`] for its
//! lifetime so callers can list or cancel it.
//!
//! # Cancellation Checkpoints
//!
//! - Immediately before each attempt's fetch
//! - During every backoff sleep
//! - Inside the fetch and body stream, as far as the [`Fetcher`] honors its token
//!
//! # Example
//!
//! ```no_run
//! use stream_downloader::download::{
//!     DownloadDestination, DownloadEngine, DownloadRequest, EngineSettings,
//! };
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = DownloadEngine::http(&EngineSettings::default())?;
//! let source = Url::parse("https://example.com/paper.pdf")?;
//! let request = DownloadRequest::new(source, DownloadDestination::new("./downloads"));
//! let path = engine.download(request).await?;
//! println!("Downloaded: {}", path.display());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use super::DownloadError;
use super::constants::{CONNECT_TIMEOUT_SECS, DEFAULT_CHUNK_SIZE, READ_TIMEOUT_SECS};
use super::destination::{DestinationResolver, DownloadDestination};
use super::fetch::{Fetcher, HttpFetcher};
use super::persister::StreamPersister;
use super::progress::ProgressCallback;
use super::registry::{
    ActiveDownloadDescriptor, ActiveDownloadRegistry, DownloadId, Registration, RegistryError,
};
use super::retry::{RetryConfiguration, RetryDecision, RetryPolicy};
use super::storage::{LocalStorage, Storage};

/// Tunables for an engine built with [`DownloadEngine::http`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Bytes buffered before each write to the temporary file.
    pub chunk_size: usize,
    /// TCP/TLS connect timeout.
    pub connect_timeout: Duration,
    /// Overall request deadline, body included.
    pub read_timeout: Duration,
    /// User-Agent override; the tool's own is used when `None`.
    pub user_agent: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            user_agent: None,
        }
    }
}

/// One caller-initiated download: what to fetch, where to put it, how to retry.
#[derive(Clone)]
pub struct DownloadRequest {
    source: Url,
    destination: DownloadDestination,
    retry: RetryConfiguration,
    headers: HeaderMap,
    on_progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("source", &self.source.as_str())
            .field("destination", &self.destination)
            .field("retry", &self.retry)
            .field("headers", &self.headers)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

impl DownloadRequest {
    /// Request with default retry configuration, no extra headers and no progress callback.
    #[must_use]
    pub fn new(source: Url, destination: DownloadDestination) -> Self {
        Self {
            source,
            destination,
            retry: RetryConfiguration::default(),
            headers: HeaderMap::new(),
            on_progress: None,
        }
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfiguration) -> Self {
        self.retry = retry;
        self
    }

    /// Adds one request header.
    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces all request headers.
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the progress callback.
    ///
    /// The callback runs on the download's own task, never concurrently with
    /// itself for the same download, with no thread marshaling.
    #[must_use]
    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    /// The remote locator.
    #[must_use]
    pub fn source(&self) -> &Url {
        &self.source
    }
}

/// Download engine facade.
///
/// Cheap to clone: all collaborators are shared behind `Arc`s, and clones
/// share one registry.
#[derive(Clone)]
pub struct DownloadEngine {
    fetcher: Arc<dyn Fetcher>,
    storage: Arc<dyn Storage>,
    resolver: DestinationResolver,
    persister: StreamPersister,
    registry: Arc<ActiveDownloadRegistry>,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("chunk_size", &self.persister.chunk_size())
            .field("active", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates an engine over the given fetch and storage boundaries, with a
    /// private registry and the default chunk size.
    #[must_use]
    pub fn new(fetcher: Arc<dyn Fetcher>, storage: Arc<dyn Storage>) -> Self {
        Self {
            fetcher,
            resolver: DestinationResolver::new(Arc::clone(&storage)),
            persister: StreamPersister::with_default_chunk_size(Arc::clone(&storage)),
            storage,
            registry: Arc::new(ActiveDownloadRegistry::new()),
        }
    }

    /// Creates an engine using [`HttpFetcher`] and [`LocalStorage`].
    ///
    /// # Errors
    ///
    /// Returns the `reqwest` builder error if the HTTP client cannot be built.
    #[instrument(level = "debug")]
    pub fn http(settings: &EngineSettings) -> Result<Self, reqwest::Error> {
        let fetcher = HttpFetcher::with_timeouts(
            settings.connect_timeout,
            settings.read_timeout,
            settings.user_agent.as_deref(),
        )?;
        debug!(chunk_size = settings.chunk_size, "creating download engine");
        Ok(Self::new(Arc::new(fetcher), Arc::new(LocalStorage::new()))
            .with_chunk_size(settings.chunk_size))
    }

    /// Sets the persistence chunk size in bytes.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.persister = StreamPersister::new(Arc::clone(&self.storage), chunk_size);
        self
    }

    /// Uses an externally owned registry, e.g. to share it between engines.
    #[must_use]
    pub fn with_registry(mut self, registry: Arc<ActiveDownloadRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Snapshot of downloads currently in flight.
    #[must_use]
    pub fn list_active_downloads(&self) -> Vec<ActiveDownloadDescriptor> {
        self.registry.list()
    }

    /// Requests cooperative cancellation; `true` if a matching download was signaled.
    pub fn cancel(&self, id: DownloadId) -> bool {
        self.registry.cancel(id)
    }

    /// Runs one logical download to completion and returns the final path.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`DownloadError`]: the first non-retryable one,
    /// or the last retryable one once attempts are exhausted.
    pub async fn download(&self, request: DownloadRequest) -> Result<PathBuf, DownloadError> {
        let registration = self.prepare(&request)?;
        self.run(registration, request).await
    }

    /// Starts the download on its own Tokio task.
    ///
    /// The download is registered before this returns, so
    /// [`DownloadTask::id`] is immediately usable with [`cancel`](Self::cancel).
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::EmptyFileName`] if no file name can be determined.
    pub fn spawn(&self, request: DownloadRequest) -> Result<DownloadTask, DownloadError> {
        let registration = self.prepare(&request)?;
        let id = registration.id();
        let source = request.source.clone();
        let engine = self.clone();
        let handle = tokio::spawn(async move { engine.run(registration, request).await });
        Ok(DownloadTask { id, source, handle })
    }

    /// Computes the prospective path and registers the download.
    fn prepare(&self, request: &DownloadRequest) -> Result<Registration, DownloadError> {
        let destination = DestinationResolver::final_path(&request.source, &request.destination)?;
        loop {
            let descriptor =
                ActiveDownloadDescriptor::new(request.source.clone(), destination.clone());
            match self.registry.register(descriptor) {
                Ok(registration) => return Ok(registration),
                Err(RegistryError::AlreadyRegistered { id }) => {
                    debug!(%id, "identifier collision, regenerating");
                }
            }
        }
    }

    #[instrument(skip_all, fields(id = %registration.id(), url = %request.source))]
    async fn run(
        &self,
        registration: Registration,
        request: DownloadRequest,
    ) -> Result<PathBuf, DownloadError> {
        let policy = RetryPolicy::new(request.retry);
        let cancel = registration.token().clone();
        let mut attempt = 0u32;

        let outcome = loop {
            attempt += 1;
            debug!(attempt, "attempting download");

            let error = match self.attempt(&request, &cancel).await {
                Ok(path) => break Ok(path),
                Err(error) => error,
            };

            match policy.should_retry(&error, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    info!(
                        attempt = next_attempt,
                        max_attempts = policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying download"
                    );
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            break Err(DownloadError::cancelled(request.source.as_str()));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, attempts = attempt, error = %error, "not retrying download");
                    break Err(error);
                }
            }
        };

        // De-register before handing the result back.
        drop(registration);
        outcome
    }

    /// One fetch-and-persist cycle.
    async fn attempt(
        &self,
        request: &DownloadRequest,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, DownloadError> {
        if cancel.is_cancelled() {
            return Err(DownloadError::cancelled(request.source.as_str()));
        }

        let response = self
            .fetcher
            .fetch(&request.source, &request.headers, cancel)
            .await?;
        validate_status(&request.source, response.status)?;

        let overwrite = request.destination.overwrite_existing;
        let final_path = self
            .resolver
            .resolve(&request.source, &request.destination)
            .await?;
        self.resolver.check_overwrite(&final_path, overwrite).await?;

        self.persister
            .persist(
                response.body,
                response.content_length,
                &final_path,
                overwrite,
                request.on_progress.as_ref(),
            )
            .await?;

        Ok(final_path)
    }
}

/// Maps a transport status code onto success, `HttpStatus` or `InvalidResponse`.
fn validate_status(url: &Url, status: u16) -> Result<(), DownloadError> {
    if !(100..=599).contains(&status) {
        return Err(DownloadError::invalid_response(
            url.as_str(),
            format!("unrecognized status code {status}"),
        ));
    }
    if !(200..300).contains(&status) {
        return Err(DownloadError::http_status(url.as_str(), status));
    }
    Ok(())
}

/// Handle to a download started with [`DownloadEngine::spawn`].
#[derive(Debug)]
pub struct DownloadTask {
    id: DownloadId,
    source: Url,
    handle: JoinHandle<Result<PathBuf, DownloadError>>,
}

impl DownloadTask {
    /// Identifier of the running download.
    #[must_use]
    pub fn id(&self) -> DownloadId {
        self.id
    }

    /// The remote locator being fetched.
    #[must_use]
    pub fn source(&self) -> &Url {
        &self.source
    }

    /// Aborts the task outright. Prefer [`DownloadEngine::cancel`] for a
    /// cooperative stop; both remove the registry entry and temporary file.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the download to finish.
    ///
    /// # Errors
    ///
    /// Returns the download's terminal error, or [`DownloadError::Cancelled`]
    /// if the task was aborted. A panic inside the task is resumed here.
    pub async fn join(self) -> Result<PathBuf, DownloadError> {
        match self.handle.await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => {
                std::panic::resume_unwind(join_error.into_panic())
            }
            Err(_) => Err(DownloadError::cancelled(self.source.as_str())),
        }
    }
}
