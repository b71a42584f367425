//! Fetch boundary and its `reqwest` implementation.
//!
//! The engine issues requests through [`Fetcher`]. [`HttpFetcher`] is the
//! production implementation. It is designed to be created once and reused
//! for many downloads, taking advantage of connection pooling.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::DownloadError;
use crate::user_agent;

/// Response body as a stream of byte chunks.
pub type ByteStream = BoxStream<'static, Result<Bytes, DownloadError>>;

/// What the fetch boundary hands back once response headers arrived.
pub struct FetchResponse {
    /// Protocol status code as reported by the transport.
    pub status: u16,
    /// Declared body length, `None` when unknown.
    pub content_length: Option<u64>,
    /// Response body.
    pub body: ByteStream,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

impl FetchResponse {
    /// Builds a response from an in-memory body, split into `chunk` sized pieces.
    ///
    /// Mostly useful for fakes in tests.
    #[must_use]
    pub fn from_bytes(status: u16, body: impl Into<Bytes>, chunk: usize) -> Self {
        let body: Bytes = body.into();
        let content_length = Some(body.len() as u64);
        let chunk = chunk.max(1);
        let pieces: Vec<Result<Bytes, DownloadError>> = (0..body.len())
            .step_by(chunk)
            .map(|start| Ok(body.slice(start..(start + chunk).min(body.len()))))
            .collect();
        Self {
            status,
            content_length,
            body: stream::iter(pieces).boxed(),
        }
    }
}

/// Capability to open a streaming GET request.
///
/// Implementations handle their own redirects, TLS and timeouts. A deadline
/// that elapses must surface as [`DownloadError::Timeout`]. Both the request
/// and the returned body stream must observe `cancel` and yield
/// [`DownloadError::Cancelled`] once it fires.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Sends the request and returns once response headers are available.
    async fn fetch(
        &self,
        url: &Url,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, DownloadError>;
}

/// HTTP fetcher on top of a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates a fetcher with explicit timeouts and an optional User-Agent override.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend cannot be initialized.
    #[instrument(level = "debug")]
    pub fn with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
        user_agent: Option<&str>,
    ) -> Result<Self, reqwest::Error> {
        let user_agent = user_agent.map_or_else(user_agent::default_download_user_agent, |ua| {
            ua.to_string()
        });
        let client = base_client_builder(connect_timeout, read_timeout, &user_agent).build()?;
        Ok(Self { client })
    }

    /// Wraps an already configured `reqwest` client.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self, headers, cancel), fields(url = %url))]
    async fn fetch(
        &self,
        url: &Url,
        headers: &HeaderMap,
        cancel: &CancellationToken,
    ) -> Result<FetchResponse, DownloadError> {
        let request = self.client.get(url.clone()).headers(headers.clone());

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::cancelled(url.as_str())),
            sent = request.send() => sent.map_err(|e| map_transport_error(url, e))?,
        };

        let status = response.status().as_u16();
        let content_length = response.content_length();
        debug!(status, ?content_length, "response headers received");

        let source = url.to_string();
        let body = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| map_transport_error_str(&source, e)))
            .boxed();

        Ok(FetchResponse {
            status,
            content_length,
            body: cancellable(body, cancel.clone(), url.to_string()),
        })
    }
}

/// Ends `body` with a single [`DownloadError::Cancelled`] once `cancel` fires.
pub(crate) fn cancellable(body: ByteStream, cancel: CancellationToken, url: String) -> ByteStream {
    stream::unfold(Some((body, cancel, url)), |state| async move {
        let (mut body, cancel, url) = state?;
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                Some((Err(DownloadError::cancelled(url)), None))
            }
            next = body.next() => {
                next.map(|item| (item, Some((body, cancel, url))))
            }
        }
    })
    .boxed()
}

fn map_transport_error(url: &Url, error: reqwest::Error) -> DownloadError {
    map_transport_error_str(url.as_str(), error)
}

fn map_transport_error_str(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

fn base_client_builder(
    connect_timeout: Duration,
    read_timeout: Duration,
    user_agent: &str,
) -> ClientBuilder {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(read_timeout)
        .gzip(true)
        .user_agent(user_agent)
}
