//! End-to-end CLI tests for the stream-downloader binary.

// `Command::cargo_bin` is deprecated in assert_cmd >=2.0.17 in favor of
// `cargo::cargo_bin_cmd!` macro. Suppressed until migration to the new API.
#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

mod support;
use support::socket_guard::start_mock_server_or_skip;

/// Command isolated from the user's real config file.
fn command(config_home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("stream-downloader").unwrap();
    cmd.env("XDG_CONFIG_HOME", config_home.path())
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(config_home: &std::path::Path, contents: &str) {
    let config_dir = config_home.join("stream-downloader");
    std::fs::create_dir_all(&config_dir).unwrap();
    std::fs::write(config_dir.join("config.toml"), contents).unwrap();
}

#[test]
fn test_binary_help_displays_usage() {
    let home = TempDir::new().unwrap();
    command(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("--max-attempts"));
}

#[test]
fn test_binary_version_displays_version() {
    let home = TempDir::new().unwrap();
    command(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_binary_without_urls_is_usage_error() {
    let home = TempDir::new().unwrap();
    command(&home).assert().code(2);
}

#[test]
fn test_binary_name_with_multiple_urls_fails() {
    let home = TempDir::new().unwrap();
    command(&home)
        .args([
            "-n",
            "out.bin",
            "https://example.com/a.bin",
            "https://example.com/b.bin",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--name"));
}

#[test]
fn test_binary_invalid_default_config_fails() {
    let home = TempDir::new().unwrap();
    write_config(home.path(), "max_attempts = 0\n");

    command(&home)
        .arg("https://example.com/a.bin")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config file"));
}

#[test]
fn test_binary_explicit_config_with_unknown_key_fails() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("custom.toml");
    std::fs::write(&config, "concurrency = 4\n").unwrap();

    command(&home)
        .arg("--config")
        .arg(&config)
        .arg("https://example.com/a.bin")
        .assert()
        .failure()
        .stderr(predicate::str::contains("custom.toml"));
}

#[test]
fn test_binary_unreachable_host_exits_one() {
    let home = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    command(&home)
        .args(["-q", "-r", "1", "-o"])
        .arg(out.path())
        .arg("http://127.0.0.1:9/file.bin")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("file.bin"));

    assert!(std::fs::read_dir(out.path()).unwrap().next().is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_downloads_into_output_dir() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/hello.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello, world".to_vec()))
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    command(&home)
        .args(["-q", "-o"])
        .arg(out.path())
        .arg(format!("{}/hello.txt", server.uri()))
        .assert()
        .success();

    assert_eq!(
        std::fs::read(out.path().join("hello.txt")).unwrap(),
        b"hello, world"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_json_summary_lists_results() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/report.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a,b\n".to_vec()))
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let output = command(&home)
        .args(["-q", "--json", "-o"])
        .arg(out.path())
        .arg(format!("{}/report.csv", server.uri()))
        .output()
        .unwrap();

    assert!(output.status.success());
    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = summary.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(entries[0]["error"].is_null());
    assert!(
        entries[0]["path"]
            .as_str()
            .unwrap()
            .ends_with("report.csv")
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_uses_config_output_dir_and_reports_partial_failure() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/ok.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone.txt"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;
    let home = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let out_dir = out.path().to_string_lossy().replace('\\', "\\\\");
    write_config(
        home.path(),
        &format!("output_dir = \"{out_dir}\"\nmax_attempts = 1\n"),
    );

    command(&home)
        .arg("-q")
        .arg(format!("{}/ok.txt", server.uri()))
        .arg(format!("{}/gone.txt", server.uri()))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("gone.txt"));

    assert_eq!(std::fs::read(out.path().join("ok.txt")).unwrap(), b"ok");
    assert!(!out.path().join("gone.txt").exists());
}
