//! Destination description, file name derivation and directory preparation.
//!
//! [`DestinationResolver`] turns a source URL and a [`DownloadDestination`]
//! into the final on-disk path. It prepares the directory but leaves the
//! overwrite decision to its two checkpoints: [`DestinationResolver::check_overwrite`]
//! before the transfer, and the persister's finalization after it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use url::Url;

use super::DownloadError;
use super::storage::{EntryKind, Storage};

/// Where a download should land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadDestination {
    /// Local directory receiving the file.
    pub directory: PathBuf,
    /// Explicit file name. Empty or whitespace-only counts as absent.
    pub file_name: Option<String>,
    /// Replace an existing file at the final path instead of failing.
    pub overwrite_existing: bool,
}

impl DownloadDestination {
    /// Destination in `directory`, file name derived from the URL, no overwrite.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            file_name: None,
            overwrite_existing: false,
        }
    }

    /// Sets an explicit file name.
    #[must_use]
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Sets the overwrite policy.
    #[must_use]
    pub fn overwrite(mut self, overwrite_existing: bool) -> Self {
        self.overwrite_existing = overwrite_existing;
        self
    }

    /// Explicit file name, trimmed, if non-empty.
    fn explicit_file_name(&self) -> Option<&str> {
        self.file_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

/// Validates and prepares destination directories and computes final paths.
#[derive(Clone)]
pub struct DestinationResolver {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for DestinationResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationResolver").finish_non_exhaustive()
    }
}

impl DestinationResolver {
    /// Creates a resolver over the given storage.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Computes the final path without touching storage.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::EmptyFileName`] if no explicit name is set and
    /// the URL's last path segment yields none.
    pub fn final_path(
        source: &Url,
        destination: &DownloadDestination,
    ) -> Result<PathBuf, DownloadError> {
        let file_name = match destination.explicit_file_name() {
            Some(name) => sanitize_file_name(name),
            None => file_name_from_url(source),
        }
        .ok_or_else(|| DownloadError::empty_file_name(source.as_str()))?;

        Ok(destination.directory.join(file_name))
    }

    /// Prepares the destination directory and returns the final path.
    ///
    /// Missing directories (and their parents) are created.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::DestinationNotDirectory`] if the directory path is a file
    /// - [`DownloadError::DirectoryPrepFailed`] if creating it fails
    /// - [`DownloadError::EmptyFileName`] if no file name can be determined
    pub async fn resolve(
        &self,
        source: &Url,
        destination: &DownloadDestination,
    ) -> Result<PathBuf, DownloadError> {
        let directory = &destination.directory;
        match self
            .storage
            .entry_kind(directory)
            .await
            .map_err(|e| DownloadError::directory_prep_failed(directory, e))?
        {
            Some(EntryKind::Directory) => {}
            Some(EntryKind::File) => {
                return Err(DownloadError::destination_not_directory(directory));
            }
            None => {
                debug!(directory = %directory.display(), "creating destination directory");
                self.storage
                    .create_dir_all(directory)
                    .await
                    .map_err(|e| DownloadError::directory_prep_failed(directory, e))?;
            }
        }

        let path = Self::final_path(source, destination)?;
        debug!(path = %path.display(), "resolved output path");
        Ok(path)
    }

    /// Fails fast when a file already sits at `path` and overwrite is off.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::DestinationExists`] on conflict, or
    /// [`DownloadError::WriteFailed`] if the path cannot be inspected.
    pub async fn check_overwrite(&self, path: &Path, overwrite: bool) -> Result<(), DownloadError> {
        if overwrite {
            return Ok(());
        }
        match self.storage.entry_kind(path).await {
            Ok(None) => Ok(()),
            Ok(Some(_)) => Err(DownloadError::destination_exists(path)),
            Err(e) => Err(DownloadError::write_failed(path, e)),
        }
    }
}

/// Derives a file name from the URL's last non-empty path segment.
fn file_name_from_url(url: &Url) -> Option<String> {
    let last = url.path_segments()?.next_back()?;
    let decoded = urlencoding::decode(last).map_or_else(|_| last.to_string(), |d| d.into_owned());
    sanitize_file_name(&decoded)
}

/// Makes a single path component safe, or `None` if nothing usable remains.
///
/// Replaces characters that are invalid on common file systems:
/// / \ : * ? " < > |
pub(crate) fn sanitize_file_name(name: &str) -> Option<String> {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() || sanitized == "." || sanitized == ".." {
        return None;
    }
    Some(sanitized)
}
