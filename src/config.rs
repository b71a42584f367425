//! File-backed configuration for engine and retry defaults.
//!
//! Values are layered: command-line flags override the config file, which
//! overrides built-in defaults. The command line expresses its overrides as a
//! [`FileConfig`] too, merged with [`FileConfig::overlay`].
//!
//! ```toml
//! output_dir = "/data/downloads"
//! max_attempts = 5
//! backoff = "exponential"
//! initial_delay_ms = 250
//! max_delay_ms = 4000
//! chunk_size = 131072
//! read_timeout_secs = 600
//! overwrite = false
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use tracing::debug;

use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_CHUNK_SIZE, DEFAULT_INITIAL_DELAY,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY, READ_TIMEOUT_SECS,
};
use crate::download::{Backoff, EngineSettings, RetryConfigError, RetryConfiguration};

const CONFIG_DIR_NAME: &str = "stream-downloader";
const CONFIG_FILE_NAME: &str = "config.toml";

const MIN_CHUNK_SIZE: usize = 1024;
const MAX_CHUNK_SIZE: usize = 16 * 1024 * 1024;
const MAX_DELAY_MS: u64 = 3_600_000;

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file '{}'", .path.display())]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has unknown keys.
    #[error("invalid config syntax")]
    Parse {
        /// Underlying TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is outside its accepted range.
    #[error("invalid config value for `{field}`: {value}. Expected range: {expected}")]
    OutOfRange {
        /// Config key.
        field: &'static str,
        /// Offending value, rendered.
        value: String,
        /// Accepted range, rendered.
        expected: &'static str,
    },
}

impl ConfigError {
    fn out_of_range(field: &'static str, value: impl ToString, expected: &'static str) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// Backoff strategy names accepted in config files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Retry immediately.
    None,
    /// Fixed delay of `initial_delay_ms`.
    Constant,
    /// Doubling (or `backoff_multiplier`) delay capped at `max_delay_ms`.
    Exponential,
}

/// Optional settings; every `None` falls through to the next layer.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Directory downloads land in.
    pub output_dir: Option<PathBuf>,
    /// Maximum attempts per download, including the first (1..=20).
    pub max_attempts: Option<u32>,
    /// Backoff strategy between attempts.
    pub backoff: Option<BackoffKind>,
    /// Constant delay, or first exponential delay, in milliseconds.
    pub initial_delay_ms: Option<u64>,
    /// Exponential delay cap in milliseconds.
    pub max_delay_ms: Option<u64>,
    /// Exponential growth factor (>= 1.0).
    pub backoff_multiplier: Option<f64>,
    /// Bytes buffered per write (1 KiB..=16 MiB).
    pub chunk_size: Option<usize>,
    /// Connect timeout in seconds (1..=3600).
    pub connect_timeout_secs: Option<u64>,
    /// Overall request timeout in seconds (1..=3600).
    pub read_timeout_secs: Option<u64>,
    /// Replace existing files instead of failing.
    pub overwrite: Option<bool>,
    /// User-Agent override.
    pub user_agent: Option<String>,
}

impl FileConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on malformed TOML or unknown keys and
    /// [`ConfigError::OutOfRange`] on invalid values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates values against runtime constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::OutOfRange`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(attempts) = self.max_attempts
            && !(1..=20).contains(&attempts)
        {
            return Err(ConfigError::out_of_range("max_attempts", attempts, "1..=20"));
        }
        if let Some(chunk_size) = self.chunk_size
            && !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size)
        {
            return Err(ConfigError::out_of_range(
                "chunk_size",
                chunk_size,
                "1024..=16777216",
            ));
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        validate_delay_ms("initial_delay_ms", self.initial_delay_ms)?;
        validate_delay_ms("max_delay_ms", self.max_delay_ms)?;
        if let Some(multiplier) = self.backoff_multiplier
            && !(multiplier.is_finite() && multiplier >= 1.0)
        {
            return Err(ConfigError::out_of_range(
                "backoff_multiplier",
                multiplier,
                "finite and >= 1.0",
            ));
        }
        Ok(())
    }

    /// Returns `self` with every value set in `overrides` replaced.
    #[must_use]
    pub fn overlay(self, overrides: FileConfig) -> FileConfig {
        FileConfig {
            output_dir: overrides.output_dir.or(self.output_dir),
            max_attempts: overrides.max_attempts.or(self.max_attempts),
            backoff: overrides.backoff.or(self.backoff),
            initial_delay_ms: overrides.initial_delay_ms.or(self.initial_delay_ms),
            max_delay_ms: overrides.max_delay_ms.or(self.max_delay_ms),
            backoff_multiplier: overrides.backoff_multiplier.or(self.backoff_multiplier),
            chunk_size: overrides.chunk_size.or(self.chunk_size),
            connect_timeout_secs: overrides.connect_timeout_secs.or(self.connect_timeout_secs),
            read_timeout_secs: overrides.read_timeout_secs.or(self.read_timeout_secs),
            overwrite: overrides.overwrite.or(self.overwrite),
            user_agent: overrides.user_agent.or(self.user_agent),
        }
    }

    /// Backoff built from the configured kind and delays, defaults filling gaps.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        let initial = self
            .initial_delay_ms
            .map_or(DEFAULT_INITIAL_DELAY, Duration::from_millis);
        match self.backoff.unwrap_or(BackoffKind::Exponential) {
            BackoffKind::None => Backoff::None,
            BackoffKind::Constant => Backoff::Constant(initial),
            BackoffKind::Exponential => Backoff::exponential(
                initial,
                self.backoff_multiplier.unwrap_or(DEFAULT_BACKOFF_MULTIPLIER),
                self.max_delay_ms.map_or(DEFAULT_MAX_DELAY, Duration::from_millis),
            ),
        }
    }

    /// Retry configuration for requests.
    ///
    /// # Errors
    ///
    /// Returns [`RetryConfigError`] if `max_attempts` is zero.
    pub fn retry_configuration(&self) -> Result<RetryConfiguration, RetryConfigError> {
        RetryConfiguration::new(
            self.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            self.backoff(),
        )
    }

    /// Engine tunables with defaults filling gaps.
    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            connect_timeout: Duration::from_secs(
                self.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
            ),
            read_timeout: Duration::from_secs(self.read_timeout_secs.unwrap_or(READ_TIMEOUT_SECS)),
            user_agent: self.user_agent.clone(),
        }
    }
}

fn validate_timeout_secs(field: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        return Err(ConfigError::out_of_range(field, value, "1..=3600"));
    }
    Ok(())
}

fn validate_delay_ms(field: &'static str, value: Option<u64>) -> Result<(), ConfigError> {
    let Some(value) = value else {
        return Ok(());
    };
    if value > MAX_DELAY_MS {
        return Err(ConfigError::out_of_range(field, value, "0..=3600000"));
    }
    Ok(())
}

/// Loaded config metadata.
#[derive(Debug, Clone, Default)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed file config when a config file exists and was valid.
    pub config: Option<FileConfig>,
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/stream-downloader/config.toml`
/// 2. `$HOME/.config/stream-downloader/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join(CONFIG_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR_NAME)
            .join(CONFIG_FILE_NAME),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config from the default path if a file is present there.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file exists but cannot be read, parsed or validated.
pub fn load_default_file_config() -> Result<LoadedConfig, ConfigError> {
    let path = resolve_default_config_path();
    let Some(path_ref) = path.as_deref() else {
        return Ok(LoadedConfig::default());
    };
    if !path_ref.exists() {
        debug!(path = %path_ref.display(), "no config file");
        return Ok(LoadedConfig { path, config: None });
    }
    let config = load_file_config(path_ref)?;
    Ok(LoadedConfig {
        path,
        config: Some(config),
    })
}

/// Loads and validates the config file at `path`.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read, parsed or validated.
pub fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config = FileConfig::from_toml_str(&raw)?;
    debug!(path = %path.display(), "loaded config file");
    Ok(config)
}
