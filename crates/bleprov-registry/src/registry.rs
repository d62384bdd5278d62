//! Write-through device registry
//!
//! The registry keeps the authoritative in-memory view of known devices
//! and persists the full list after every mutation. Mutations are
//! serialized: one add/remove completes, including its durable write,
//! before the next is accepted, so interleaved callers cannot lose
//! updates. At BLE-app scale (tens of records) a full rewrite per
//! mutation is cheaper than any batching machinery.

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use bleprov_core::{DeviceId, DeviceRecord, Result};

use crate::store::{ListStore, MemoryListStore};

/// Default storage key for the device list
pub const DEFAULT_REGISTRY_KEY: &str = "devices";

/// Persistent registry of known devices
///
/// Records are unique by identifier and kept in first-insert order for
/// display. `add` is an idempotent upsert; `remove` of an absent
/// identifier is a no-op, not an error.
pub struct DeviceRegistry {
    store: Box<dyn ListStore>,
    key: String,
    records: Mutex<Vec<DeviceRecord>>,
}

impl DeviceRegistry {
    /// Open a registry over the given store, loading any persisted records.
    ///
    /// An absent list is the expected first-run state and yields an empty
    /// registry. Entries that fail to decode are skipped with a warning
    /// rather than poisoning the whole registry; truly unavailable
    /// storage surfaces `StorageUnavailable`.
    pub async fn open(store: Box<dyn ListStore>, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        let entries = store.read_list(&key).await?.unwrap_or_default();
        let records = decode_entries(&entries);

        info!(key = %key, count = records.len(), "Loaded device registry");
        Ok(Self {
            store,
            key,
            records: Mutex::new(records),
        })
    }

    /// Open a registry under the default storage key
    pub async fn open_default(store: Box<dyn ListStore>) -> Result<Self> {
        Self::open(store, DEFAULT_REGISTRY_KEY).await
    }

    /// Open a registry, falling back to an empty in-memory one if durable
    /// storage is unavailable.
    ///
    /// The caller keeps a working device list for the rest of the session
    /// instead of failing outright; nothing added in this mode survives a
    /// restart. The storage failure is logged at warn.
    pub async fn open_or_ephemeral(store: Box<dyn ListStore>, key: impl Into<String>) -> Self {
        let key = key.into();
        match Self::open(store, key.clone()).await {
            Ok(registry) => registry,
            Err(e) => {
                warn!(error = %e, "Storage unavailable, using an ephemeral in-memory registry");
                Self {
                    store: Box::new(MemoryListStore::new()),
                    key,
                    records: Mutex::new(Vec::new()),
                }
            }
        }
    }

    /// Re-read the persisted list, replacing the in-memory view.
    ///
    /// Picks up writes made behind this registry's back (another process,
    /// an external edit of the store file). Entries that fail to decode
    /// are skipped the same way `open` skips them.
    pub async fn reload(&self) -> Result<()> {
        let mut records = self.records.lock().await;
        let entries = self.store.read_list(&self.key).await?.unwrap_or_default();
        *records = decode_entries(&entries);
        debug!(key = %self.key, count = records.len(), "Reloaded device registry");
        Ok(())
    }

    /// Add or refresh a device record.
    ///
    /// If the identifier is already present the existing record's display
    /// name and last-seen timestamp are updated in place; otherwise the
    /// record is appended. The list is persisted before this returns.
    pub async fn add(&self, record: DeviceRecord) -> Result<()> {
        let mut records = self.records.lock().await;

        match records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => {
                debug!(id = %record.id, "Updating existing device record");
                existing.display_name = record.display_name;
                existing.last_seen = record.last_seen;
            }
            None => {
                info!(id = %record.id, name = %record.display_name, "Adding device to registry");
                records.push(record);
            }
        }

        self.persist(&records).await
    }

    /// Remove a device by identifier.
    ///
    /// Returns `Ok(true)` if a record was removed, `Ok(false)` if the
    /// identifier was not present (a no-op, not an error).
    pub async fn remove(&self, id: &DeviceId) -> Result<bool> {
        let mut records = self.records.lock().await;

        let before = records.len();
        records.retain(|r| &r.id != id);
        let removed = records.len() < before;

        if removed {
            info!(id = %id, "Removed device from registry");
            self.persist(&records).await?;
        } else {
            debug!(id = %id, "Remove requested for unknown device, ignoring");
        }
        Ok(removed)
    }

    /// Current in-memory view of all records, in first-insert order
    pub async fn list(&self) -> Vec<DeviceRecord> {
        self.records.lock().await.clone()
    }

    /// Look up a single record by identifier
    pub async fn get(&self, id: &DeviceId) -> Option<DeviceRecord> {
        self.records.lock().await.iter().find(|r| &r.id == id).cloned()
    }

    /// Whether a device is present in the registry
    pub async fn contains(&self, id: &DeviceId) -> bool {
        self.records.lock().await.iter().any(|r| &r.id == id)
    }

    /// Number of registered devices
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// Whether the registry holds no records
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Write the full record list through to the store.
    ///
    /// Called with the record lock held so a concurrent mutation cannot
    /// interleave between the in-memory change and its durable write.
    async fn persist(&self, records: &[DeviceRecord]) -> Result<()> {
        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            entries.push(record.to_entry()?);
        }
        self.store.write_list(&self.key, &entries).await
    }
}

/// Decode stored entries, skipping bad or duplicate ones
fn decode_entries(entries: &[String]) -> Vec<DeviceRecord> {
    let mut records: Vec<DeviceRecord> = Vec::with_capacity(entries.len());
    for entry in entries {
        match DeviceRecord::from_entry(entry) {
            Ok(record) => {
                // Defend the uniqueness invariant against a tampered list
                if records.iter().any(|r| r.id == record.id) {
                    warn!(id = %record.id, "Skipping duplicate registry entry");
                    continue;
                }
                records.push(record);
            }
            Err(e) => warn!(error = %e, "Skipping undecodable registry entry"),
        }
    }
    records
}
