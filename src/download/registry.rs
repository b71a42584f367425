//! Concurrency-safe registry of in-flight downloads.
//!
//! The registry maps each [`DownloadId`] to its [`ActiveDownloadDescriptor`]
//! and a [`CancellationToken`]. All mutations go through one
//! `std::sync::Mutex`; the lock is never held across an `.await`.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use stream_downloader::download::{ActiveDownloadDescriptor, ActiveDownloadRegistry};
//! use url::Url;
//!
//! let registry = Arc::new(ActiveDownloadRegistry::new());
//! let source = Url::parse("https://example.com/file.bin").unwrap();
//! let descriptor = ActiveDownloadDescriptor::new(source, "/tmp/file.bin".into());
//! let id = descriptor.id;
//!
//! let registration = registry.register(descriptor).unwrap();
//! assert_eq!(registry.list().len(), 1);
//! assert!(registry.cancel(id));
//! assert!(registration.token().is_cancelled());
//!
//! drop(registration);
//! assert!(registry.list().is_empty());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// Unique token identifying one logical download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DownloadId(Uuid);

impl DownloadId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DownloadId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Public view of one in-flight download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveDownloadDescriptor {
    /// Identifier used for cancellation.
    pub id: DownloadId,
    /// Remote locator being fetched.
    pub source: Url,
    /// Resolved local path the download will publish to.
    pub destination: PathBuf,
    /// When the download was registered.
    pub started_at: DateTime<Utc>,
}

impl ActiveDownloadDescriptor {
    /// Creates a descriptor with a fresh identifier, stamped now.
    #[must_use]
    pub fn new(source: Url, destination: PathBuf) -> Self {
        Self {
            id: DownloadId::new(),
            source,
            destination,
            started_at: Utc::now(),
        }
    }
}

/// Errors returned by [`ActiveDownloadRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// An entry with the same identifier is already registered.
    #[error("download {id} is already registered")]
    AlreadyRegistered {
        /// The duplicate identifier.
        id: DownloadId,
    },
}

#[derive(Debug)]
struct Entry {
    descriptor: ActiveDownloadDescriptor,
    cancel: CancellationToken,
}

/// Map of active downloads, shared between the engine and its callers.
///
/// Each engine owns (or is handed) its own registry; there is no global
/// instance, so isolated registries can coexist in one process.
#[derive(Debug, Default)]
pub struct ActiveDownloadRegistry {
    entries: Mutex<HashMap<DownloadId, Entry>>,
}

impl ActiveDownloadRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<DownloadId, Entry>> {
        // Every critical section leaves the map consistent, so a poisoned
        // lock is still safe to use.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `descriptor` and returns a guard that de-registers on drop.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if the identifier is
    /// already present; the existing entry is left untouched.
    pub fn register(
        self: &Arc<Self>,
        descriptor: ActiveDownloadDescriptor,
    ) -> Result<Registration, RegistryError> {
        let id = descriptor.id;
        let cancel = CancellationToken::new();
        {
            let mut entries = self.lock();
            if entries.contains_key(&id) {
                return Err(RegistryError::AlreadyRegistered { id });
            }
            entries.insert(
                id,
                Entry {
                    descriptor,
                    cancel: cancel.clone(),
                },
            );
        }
        debug!(%id, "registered active download");
        Ok(Registration {
            registry: Arc::clone(self),
            id,
            cancel,
        })
    }

    /// Removes `id`, returning its descriptor if it was present.
    pub fn unregister(&self, id: DownloadId) -> Option<ActiveDownloadDescriptor> {
        let removed = self.lock().remove(&id).map(|entry| entry.descriptor);
        if removed.is_some() {
            debug!(%id, "unregistered active download");
        }
        removed
    }

    /// Point-in-time copy of all active downloads, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<ActiveDownloadDescriptor> {
        let mut snapshot: Vec<ActiveDownloadDescriptor> = self
            .lock()
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect();
        snapshot.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        snapshot
    }

    /// Returns the descriptor for `id`, if active.
    #[must_use]
    pub fn get(&self, id: DownloadId) -> Option<ActiveDownloadDescriptor> {
        self.lock().get(&id).map(|entry| entry.descriptor.clone())
    }

    /// Signals cooperative cancellation for `id`.
    ///
    /// Returns `true` if a matching active download was signaled. The owning
    /// download observes the signal at its next cancellation checkpoint.
    pub fn cancel(&self, id: DownloadId) -> bool {
        let token = self.lock().get(&id).map(|entry| entry.cancel.clone());
        match token {
            Some(token) => {
                token.cancel();
                debug!(%id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Number of active downloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no downloads are active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Live registry entry owned by a running download.
///
/// Dropping it removes the entry, so a download's descriptor never outlives
/// the task that owns it, even when that task is aborted.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ActiveDownloadRegistry>,
    id: DownloadId,
    cancel: CancellationToken,
}

impl Registration {
    /// The registered identifier.
    #[must_use]
    pub fn id(&self) -> DownloadId {
        self.id
    }

    /// Cancellation token signaled by [`ActiveDownloadRegistry::cancel`].
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}
