//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use reqwest::header::{HeaderName, HeaderValue};
use stream_downloader::{BackoffKind, FileConfig};
use url::Url;

/// Stream remote files to disk with retry and progress.
///
/// Each URL is downloaded concurrently into the output directory through a
/// temporary file that is renamed into place once complete.
#[derive(Parser, Debug)]
#[command(name = "stream-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<Url>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Directory downloads are written to (default: current directory)
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// File name to save as (single URL only)
    #[arg(short = 'n', long, value_name = "FILE")]
    pub name: Option<String>,

    /// Replace existing files instead of failing
    #[arg(long)]
    pub overwrite: bool,

    /// Maximum attempts per download, including the first (1-20)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(1..=20))]
    pub max_attempts: Option<u32>,

    /// Delay strategy between attempts
    #[arg(long, value_enum)]
    pub backoff: Option<BackoffKind>,

    /// Constant delay, or first exponential delay, in milliseconds
    #[arg(long, value_name = "MS")]
    pub initial_delay_ms: Option<u64>,

    /// Cap for exponential delays in milliseconds
    #[arg(long, value_name = "MS")]
    pub max_delay_ms: Option<u64>,

    /// Extra request header, e.g. -H "Authorization: Bearer TOKEN" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE", value_parser = parse_header)]
    pub headers: Vec<(HeaderName, HeaderValue)>,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print a JSON summary of every download to stdout
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// Rejects flag combinations clap cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_some() && self.urls.len() > 1 {
            bail!("--name can only be used with a single URL");
        }
        Ok(())
    }

    /// Values given on the command line, as a config layer.
    pub fn overrides(&self) -> FileConfig {
        FileConfig {
            output_dir: self.output_dir.clone(),
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            initial_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            overwrite: self.overwrite.then_some(true),
            ..FileConfig::default()
        }
    }
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), String> {
    let Some((name, value)) = raw.split_once(':') else {
        return Err(format!("expected 'Name: value', got '{raw}'"));
    };
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .map_err(|e| format!("invalid header name '{}': {e}", name.trim()))?;
    let value = HeaderValue::from_str(value.trim())
        .map_err(|e| format!("invalid header value for '{name}': {e}"))?;
    Ok((name, value))
}
