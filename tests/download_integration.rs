//! Integration tests for the HTTP download flow.
//!
//! These tests drive the real `reqwest` fetcher against wiremock servers.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stream_downloader::{
    Backoff, DownloadDestination, DownloadEngine, DownloadError, DownloadProgress,
    DownloadRequest, EngineSettings, HttpFetcher, LocalStorage, ProgressCallback,
    RetryConfiguration,
};
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

fn engine() -> DownloadEngine {
    DownloadEngine::http(&EngineSettings::default()).expect("client should build")
}

fn source(server: &MockServer, route: &str) -> Url {
    Url::parse(&format!("{}{route}", server.uri())).expect("valid url")
}

fn no_delay(max_attempts: u32) -> RetryConfiguration {
    RetryConfiguration::new(max_attempts, Backoff::Constant(Duration::ZERO)).expect("valid")
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<DownloadProgress>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: ProgressCallback = Arc::new(move |progress| {
        sink.lock().expect("lock").push(progress);
    });
    (callback, events)
}

fn leftover_temp_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .expect("read dir")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".part"))
        .collect()
}

async fn mount_file(server: &MockServer, route: &str, content: &[u8]) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(content.to_vec()))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_download_known_length_reports_completion() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let payload = vec![0x5Au8; 4096];
    mount_file(&server, "/blob.bin", &payload).await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let (callback, events) = recorder();

    let request = DownloadRequest::new(
        source(&server, "/blob.bin"),
        DownloadDestination::new(temp_dir.path()),
    )
    .on_progress(callback);
    let file_path = engine().download(request).await.expect("download should succeed");

    assert_eq!(file_path, temp_dir.path().join("blob.bin"));
    assert_eq!(std::fs::read(&file_path).expect("read"), payload);

    let events = events.lock().expect("lock");
    assert!(
        events
            .iter()
            .any(|p| p.bytes_received == 4096 && p.fraction_completed() == Some(1.0)),
        "expected a completion event, got {events:?}"
    );
    let received: Vec<u64> = events.iter().map(|p| p.bytes_received).collect();
    assert!(received.windows(2).all(|w| w[0] <= w[1]), "{received:?}");
}

#[tokio::test]
async fn test_download_explicit_name_into_new_nested_directory() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let content = b"This is the complete file content for testing.\nLine 2.\nLine 3.";
    mount_file(&server, "/api/download", content).await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let nested = temp_dir.path().join("a").join("b");

    let request = DownloadRequest::new(
        source(&server, "/api/download"),
        DownloadDestination::new(&nested).with_file_name("  report.txt "),
    );
    let file_path = engine().download(request).await.expect("download should succeed");

    assert_eq!(file_path, nested.join("report.txt"));
    assert_eq!(std::fs::read(&file_path).expect("read"), content);
    assert!(leftover_temp_files(&nested).is_empty());
}

#[tokio::test]
async fn test_download_not_found_retries_then_reports_status() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/missing.pdf"))
        .respond_with(ResponseTemplate::new(404))
        .expect(2)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let engine = engine();
    let request = DownloadRequest::new(
        source(&server, "/missing.pdf"),
        DownloadDestination::new(temp_dir.path()),
    )
    .retry(no_delay(2));
    let err = engine.download(request).await.unwrap_err();

    match err {
        DownloadError::HttpStatus { status, .. } => assert_eq!(status, 404),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!temp_dir.path().join("missing.pdf").exists());
    assert!(engine.list_active_downloads().is_empty());
}

#[tokio::test]
async fn test_download_server_error_then_success() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/flaky.bin"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_file(&server, "/flaky.bin", b"recovered").await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let request = DownloadRequest::new(
        source(&server, "/flaky.bin"),
        DownloadDestination::new(temp_dir.path()),
    )
    .retry(no_delay(3));
    let file_path = engine().download(request).await.expect("second attempt succeeds");

    assert_eq!(std::fs::read(&file_path).expect("read"), b"recovered");
}

#[tokio::test]
async fn test_download_existing_file_is_preserved_without_overwrite() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/data.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"new".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let existing = temp_dir.path().join("data.csv");
    std::fs::write(&existing, b"old").expect("seed file");

    let request = DownloadRequest::new(
        source(&server, "/data.csv"),
        DownloadDestination::new(temp_dir.path()),
    )
    .retry(no_delay(3));
    let err = engine().download(request).await.unwrap_err();

    assert!(
        matches!(err, DownloadError::DestinationExists { ref path } if *path == existing),
        "unexpected error: {err:?}"
    );
    assert_eq!(std::fs::read(&existing).expect("read"), b"old");
    assert!(leftover_temp_files(temp_dir.path()).is_empty());
}

#[tokio::test]
async fn test_download_overwrite_replaces_existing_file() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_file(&server, "/data.csv", b"fresh,content").await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let existing = temp_dir.path().join("data.csv");
    std::fs::write(&existing, b"stale").expect("seed file");

    let request = DownloadRequest::new(
        source(&server, "/data.csv"),
        DownloadDestination::new(temp_dir.path()).overwrite(true),
    );
    let file_path = engine().download(request).await.expect("overwrite succeeds");

    assert_eq!(file_path, existing);
    assert_eq!(std::fs::read(&existing).expect("read"), b"fresh,content");
}

#[tokio::test]
async fn test_download_sends_request_headers() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/private.bin"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let request = DownloadRequest::new(
        source(&server, "/private.bin"),
        DownloadDestination::new(temp_dir.path()),
    )
    .header(
        reqwest::header::AUTHORIZATION,
        reqwest::header::HeaderValue::from_static("Bearer secret"),
    );
    let file_path = engine().download(request).await.expect("download should succeed");

    assert_eq!(std::fs::read(&file_path).expect("read"), b"ok");
}

#[tokio::test]
async fn test_download_through_caller_configured_client() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/tenant.bin"))
        .and(header("x-tenant", "acme"))
        .and(header("x-request", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"scoped".to_vec()))
        .expect(1)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let mut defaults = reqwest::header::HeaderMap::new();
    defaults.insert("x-tenant", reqwest::header::HeaderValue::from_static("acme"));
    let client = reqwest::Client::builder()
        .default_headers(defaults)
        .build()
        .expect("client should build");
    let engine = DownloadEngine::new(
        Arc::new(HttpFetcher::from_client(client)),
        Arc::new(LocalStorage::new()),
    );

    let request = DownloadRequest::new(
        source(&server, "/tenant.bin"),
        DownloadDestination::new(temp_dir.path()),
    )
    .header(
        reqwest::header::HeaderName::from_static("x-request"),
        reqwest::header::HeaderValue::from_static("42"),
    );
    let file_path = engine.download(request).await.expect("download should succeed");

    assert_eq!(std::fs::read(&file_path).expect("read"), b"scoped");
}

#[tokio::test]
async fn test_download_destination_is_a_file() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_file(&server, "/file.bin", b"bytes").await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let blocker = temp_dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").expect("seed file");

    let request = DownloadRequest::new(
        source(&server, "/file.bin"),
        DownloadDestination::new(&blocker),
    )
    .retry(no_delay(3));
    let err = engine().download(request).await.unwrap_err();

    assert!(
        matches!(err, DownloadError::DestinationNotDirectory { .. }),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_download_url_without_file_name_fails_before_request() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let engine = engine();
    let request = DownloadRequest::new(
        source(&server, "/"),
        DownloadDestination::new(temp_dir.path()),
    );
    let err = engine.download(request).await.unwrap_err();

    assert!(
        matches!(err, DownloadError::EmptyFileName { .. }),
        "unexpected error: {err:?}"
    );
    assert!(engine.list_active_downloads().is_empty());
}

#[tokio::test]
async fn test_download_slow_server_times_out() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/slow.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"late".to_vec())
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;
    let temp_dir = TempDir::new().expect("failed to create temp dir");

    let settings = EngineSettings {
        read_timeout: Duration::from_millis(200),
        ..EngineSettings::default()
    };
    let engine = DownloadEngine::http(&settings).expect("client should build");
    let request = DownloadRequest::new(
        source(&server, "/slow.bin"),
        DownloadDestination::new(temp_dir.path()),
    )
    .retry(no_delay(1));
    let err = engine.download(request).await.unwrap_err();

    assert!(matches!(err, DownloadError::Timeout { .. }), "unexpected error: {err:?}");
    assert!(err.is_retryable());
}
