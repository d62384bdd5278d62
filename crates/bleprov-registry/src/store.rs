//! List-storage collaborators backing the device registry
//!
//! The registry depends only on the narrow [`ListStore`] contract: read a
//! named list of string entries, write one back. An absent key is the
//! expected first-run state and reads as `Ok(None)`, never an error;
//! unavailable storage surfaces `StorageUnavailable`.
//!
//! Two implementations are provided:
//!
//! - [`MemoryListStore`] - process-local, for tests and ephemeral use
//! - [`JsonFileStore`] - one JSON document per store file, written
//!   atomically via a temp file and rename

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use bleprov_core::{ProvisionError, Result};

/// Narrow key-to-string-list storage contract
///
/// Implementations must treat an absent key as `Ok(None)` and reserve
/// errors for genuinely unavailable storage.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Read the list stored under `key`, or `None` if no prior data exists
    async fn read_list(&self, key: &str) -> Result<Option<Vec<String>>>;

    /// Replace the list stored under `key`
    async fn write_list(&self, key: &str, entries: &[String]) -> Result<()>;
}

/// In-memory list store
///
/// Contents do not survive the process; useful for tests and for the
/// registry's fallback mode when durable storage is unavailable.
#[derive(Debug, Default)]
pub struct MemoryListStore {
    lists: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryListStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ListStore for MemoryListStore {
    async fn read_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        let lists = self
            .lists
            .lock()
            .map_err(|_| ProvisionError::Internal("store mutex poisoned".to_string()))?;
        Ok(lists.get(key).cloned())
    }

    async fn write_list(&self, key: &str, entries: &[String]) -> Result<()> {
        let mut lists = self
            .lists
            .lock()
            .map_err(|_| ProvisionError::Internal("store mutex poisoned".to_string()))?;
        lists.insert(key.to_string(), entries.to_vec());
        Ok(())
    }
}

/// File-backed list store
///
/// Persists all keys as a single JSON document. Writes go to a sibling
/// temp file first and are moved into place with a rename, so a crash
/// mid-write leaves the previous document intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by the given file path.
    ///
    /// The file is created on first write; a missing file reads as empty.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// The file path backing this store
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<HashMap<String, Vec<String>>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(ProvisionError::StorageUnavailable {
                    reason: format!("read {}: {}", self.path.display(), e),
                })
            }
        };
        serde_json::from_str(&raw).map_err(|e| ProvisionError::StorageUnavailable {
            reason: format!("parse {}: {}", self.path.display(), e),
        })
    }

    async fn write_document(&self, document: &HashMap<String, Vec<String>>) -> Result<()> {
        let raw = serde_json::to_string_pretty(document)
            .map_err(|e| ProvisionError::Internal(e.to_string()))?;

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, raw.as_bytes())
            .await
            .map_err(|e| ProvisionError::StorageUnavailable {
                reason: format!("write {}: {}", tmp.display(), e),
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| ProvisionError::StorageUnavailable {
                reason: format!("rename into {}: {}", self.path.display(), e),
            })?;

        debug!(path = %self.path.display(), "Persisted store document");
        Ok(())
    }
}

#[async_trait]
impl ListStore for JsonFileStore {
    async fn read_list(&self, key: &str) -> Result<Option<Vec<String>>> {
        Ok(self.read_document().await?.remove(key))
    }

    async fn write_list(&self, key: &str, entries: &[String]) -> Result<()> {
        let mut document = self.read_document().await?;
        document.insert(key.to_string(), entries.to_vec());
        self.write_document(&document).await
    }
}
