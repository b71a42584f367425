//! Storage boundary: the file system primitives the engine consumes.
//!
//! The engine only ever touches disk through [`Storage`], so tests can run
//! against fakes and embedders can redirect writes. [`LocalStorage`] is the
//! production implementation on top of `tokio::fs`.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncWrite;

/// Writable handle returned by [`Storage::create_new`].
pub type FileWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// What currently occupies a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Any non-directory entry.
    File,
    /// A directory.
    Directory,
}

/// File system operations used by the destination resolver and persister.
///
/// `rename` must be atomic when both paths live on the same file system.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Returns what is at `path`, or `None` if nothing is.
    async fn entry_kind(&self, path: &Path) -> io::Result<Option<EntryKind>>;

    /// Creates `path` and any missing parents.
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Creates a new file, failing if `path` already exists.
    async fn create_new(&self, path: &Path) -> io::Result<FileWriter>;

    /// Removes the file at `path`.
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Renames `from` to `to`. The persister clears `to` beforehand.
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// [`Storage`] backed by the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl LocalStorage {
    /// Creates a local storage handle.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn entry_kind(&self, path: &Path) -> io::Result<Option<EntryKind>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => Ok(Some(EntryKind::Directory)),
            Ok(_) => Ok(Some(EntryKind::File)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn create_new(&self, path: &Path) -> io::Result<FileWriter> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        Ok(Box::new(file))
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        tokio::fs::rename(from, to).await
    }
}
