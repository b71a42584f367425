//! Retry logic with configurable backoff for transient download failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying download errors and determining retry behavior.
//!
//! # Overview
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Failures that may succeed on another attempt
//! - [`FailureType::Permanent`] - Failures that won't succeed regardless of retries
//!
//! The [`RetryPolicy`] then decides whether to retry based on the failure type
//! and the attempt count, and computes the backoff delay. No jitter is applied.
//!
//! # Example
//!
//! ```
//! use stream_downloader::download::{
//!     DownloadError, RetryConfiguration, RetryDecision, RetryPolicy,
//! };
//!
//! let policy = RetryPolicy::new(RetryConfiguration::default());
//! let error = DownloadError::http_status("https://example.com/file.pdf", 503);
//!
//! match policy.should_retry(&error, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         println!("Retrying in {:?} (attempt {})", delay, attempt);
//!     }
//!     RetryDecision::DoNotRetry { reason } => {
//!         println!("Not retrying: {}", reason);
//!     }
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::DownloadError;
use super::constants::{
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};

/// Classification of download failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Failure that may succeed on another attempt.
    ///
    /// Examples: timeout, connection reset, any non-2xx status.
    Transient,

    /// Failure that won't succeed regardless of retries.
    ///
    /// Examples: existing destination file, unwritable directory, cancellation.
    Permanent,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Delay strategy applied between unsuccessful attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Retry immediately.
    None,
    /// Wait the same duration before every retry.
    Constant(Duration),
    /// `initial * multiplier^(attempt - 1)`, capped at `maximum`.
    Exponential {
        /// Delay before the first retry.
        initial: Duration,
        /// Growth factor per attempt.
        multiplier: f64,
        /// Upper bound for any single delay.
        maximum: Duration,
    },
}

impl Backoff {
    /// Convenience constructor for exponential backoff.
    #[must_use]
    pub fn exponential(initial: Duration, multiplier: f64, maximum: Duration) -> Self {
        Self::Exponential {
            initial,
            multiplier,
            maximum,
        }
    }

    /// Computes the delay that follows failed attempt `attempt` (1-indexed).
    ///
    /// A non-positive or non-numeric computed delay is returned as
    /// [`Duration::ZERO`], meaning "retry immediately".
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match *self {
            Self::None => Duration::ZERO,
            Self::Constant(delay) => delay,
            Self::Exponential {
                initial,
                multiplier,
                maximum,
            } => {
                let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
                let secs = initial.as_secs_f64() * multiplier.powi(exponent);
                if secs.is_nan() || secs <= 0.0 {
                    return Duration::ZERO;
                }
                // Infinite or out-of-range values saturate at the cap.
                Duration::try_from_secs_f64(secs).map_or(maximum, |delay| delay.min(maximum))
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(
            DEFAULT_INITIAL_DELAY,
            DEFAULT_BACKOFF_MULTIPLIER,
            DEFAULT_MAX_DELAY,
        )
    }
}

/// Error building a [`RetryConfiguration`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetryConfigError {
    /// `max_attempts` was zero.
    #[error("invalid max_attempts {value}: at least one attempt is required")]
    InvalidMaxAttempts {
        /// The rejected value.
        value: u32,
    },
}

/// Immutable retry configuration for one logical download.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `backoff`: exponential, 0.5s initial, multiplier 2, capped at 8s
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfiguration {
    max_attempts: u32,
    backoff: Backoff,
}

impl RetryConfiguration {
    /// Creates a retry configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RetryConfigError::InvalidMaxAttempts`] if `max_attempts < 1`.
    pub fn new(max_attempts: u32, backoff: Backoff) -> Result<Self, RetryConfigError> {
        if max_attempts < 1 {
            return Err(RetryConfigError::InvalidMaxAttempts {
                value: max_attempts,
            });
        }
        Ok(Self {
            max_attempts,
            backoff,
        })
    }

    /// Returns the maximum number of attempts, including the first one.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the configured backoff strategy.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }
}

impl Default for RetryConfiguration {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Backoff::default(),
        }
    }
}

/// Pure retry decision object built from a [`RetryConfiguration`].
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfiguration,
}

impl RetryPolicy {
    /// Creates a policy from a configuration.
    #[must_use]
    pub fn new(config: RetryConfiguration) -> Self {
        Self { config }
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Returns the delay that follows failed attempt `attempt` (1-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.config.backoff.delay_for_attempt(attempt)
    }

    /// Determines whether to retry after attempt `attempt` (1-indexed) failed with `error`.
    ///
    /// Permanent errors never retry, whatever the attempt count. Attempt
    /// `max_attempts` is the last one; its error is returned as-is.
    #[instrument(skip(self, error), fields(max_attempts = self.config.max_attempts))]
    pub fn should_retry(&self, error: &DownloadError, attempt: u32) -> RetryDecision {
        if classify_error(error) == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.config.max_attempts {
            debug!(attempt, max = self.config.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.config.max_attempts),
            };
        }

        let delay = self.delay_for_attempt(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }
}

/// Classifies a download error into a failure type for retry decisions.
///
/// | Error | Type | Rationale |
/// |-------|------|-----------|
/// | InvalidResponse | Transient | Garbled response may not repeat |
/// | HttpStatus (any) | Transient | Server state may change |
/// | Network | Transient | Connection may recover |
/// | Timeout | Transient | Network may recover |
/// | EmptyFileName | Permanent | Same input, same result |
/// | DestinationNotDirectory | Permanent | Local layout problem |
/// | DestinationExists | Permanent | Overwrite disabled |
/// | DirectoryPrepFailed | Permanent | Local file system issue |
/// | WriteFailed | Permanent | Local file system issue |
/// | Cancelled | Permanent | Caller asked to stop |
#[must_use]
#[allow(clippy::match_same_arms)]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::InvalidResponse { .. } => FailureType::Transient,
        DownloadError::HttpStatus { .. } => FailureType::Transient,
        DownloadError::Network { .. } => FailureType::Transient,
        DownloadError::Timeout { .. } => FailureType::Transient,

        DownloadError::EmptyFileName { .. } => FailureType::Permanent,
        DownloadError::DestinationNotDirectory { .. } => FailureType::Permanent,
        DownloadError::DestinationExists { .. } => FailureType::Permanent,
        DownloadError::DirectoryPrepFailed { .. } => FailureType::Permanent,
        DownloadError::WriteFailed { .. } => FailureType::Permanent,
        DownloadError::Cancelled { .. } => FailureType::Permanent,
    }
}
