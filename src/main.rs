//! CLI entry point for stream-downloader.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use reqwest::header::HeaderMap;
use serde_json::json;
use stream_downloader::config::{load_default_file_config, load_file_config};
use stream_downloader::{
    DownloadDestination, DownloadEngine, DownloadProgress, DownloadRequest, FileConfig,
    ProgressCallback,
};
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");
    args.validate()?;

    let config = load_config(&args)?;
    let retry = config
        .retry_configuration()
        .context("Invalid retry settings")?;
    let engine = DownloadEngine::http(&config.engine_settings())
        .context("Failed to build HTTP client")?;

    let output_dir = config
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let overwrite = config.overwrite.unwrap_or(false);
    let headers: HeaderMap = args.headers.iter().cloned().collect();

    let progress = if args.quiet {
        MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
    } else {
        MultiProgress::new()
    };

    spawn_interrupt_handler(engine.clone());

    info!(urls = args.urls.len(), output_dir = %output_dir.display(), "starting downloads");

    let mut failures = 0usize;
    let mut summary = Vec::with_capacity(args.urls.len());
    let mut tasks = Vec::with_capacity(args.urls.len());
    for url in &args.urls {
        let mut destination = DownloadDestination::new(&output_dir).overwrite(overwrite);
        if let Some(name) = &args.name {
            destination = destination.with_file_name(name);
        }

        let bar = progress.add(new_spinner(url.as_str()));
        let request = DownloadRequest::new(url.clone(), destination)
            .retry(retry)
            .headers(headers.clone())
            .on_progress(progress_callback(bar.clone()));

        match engine.spawn(request) {
            Ok(task) => {
                debug!(id = %task.id(), url = %url, "download started");
                tasks.push((url.clone(), bar, task));
            }
            Err(e) => {
                failures += 1;
                bar.abandon_with_message(format!("{url}: {e}"));
                eprintln!("error: {url}: {e}");
                summary.push(json!({ "url": url.as_str(), "path": null, "error": e.to_string() }));
            }
        }
    }

    for (url, bar, task) in tasks {
        match task.join().await {
            Ok(path) => {
                bar.finish_with_message(format!("{}", path.display()));
                info!(url = %url, path = %path.display(), "download complete");
                summary.push(json!({ "url": url.as_str(), "path": path.display().to_string(), "error": null }));
            }
            Err(e) => {
                failures += 1;
                bar.abandon_with_message(format!("{url}: {e}"));
                eprintln!("error: {url}: {e}");
                summary.push(json!({ "url": url.as_str(), "path": null, "error": e.to_string() }));
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    info!(
        total = args.urls.len(),
        failed = failures,
        "all downloads finished"
    );

    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// File config (explicit path or default location) overlaid with CLI values.
fn load_config(args: &Args) -> Result<FileConfig> {
    let file_config = match &args.config {
        Some(path) => load_file_config(path)
            .with_context(|| format!("Failed to load config file '{}'", path.display()))?,
        None => {
            let loaded = load_default_file_config().context("Failed to load config file")?;
            if let Some(path) = &loaded.path {
                debug!(path = %path.display(), found = loaded.config.is_some(), "default config path");
            }
            loaded.config.unwrap_or_default()
        }
    };

    let config = file_config.overlay(args.overrides());
    config.validate().context("Invalid settings")?;
    Ok(config)
}

/// Cancels every active download on Ctrl-C.
fn spawn_interrupt_handler(engine: DownloadEngine) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling downloads");
            for download in engine.list_active_downloads() {
                engine.cancel(download.id);
            }
        }
    });
}

fn new_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {bytes} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("[{bar:30}] {bytes}/{total_bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Switches the spinner to a bar once the total is known.
fn progress_callback(bar: ProgressBar) -> ProgressCallback {
    Arc::new(move |progress: DownloadProgress| {
        if let Some(total) = progress.total_bytes_expected
            && bar.length() != Some(total)
        {
            bar.set_length(total);
            bar.set_style(bar_style());
        }
        bar.set_position(progress.bytes_received);
    })
}
