//! Device identity, persisted records, and ephemeral scan results
//!
//! A [`DeviceRecord`] is what the registry persists across restarts; a
//! [`ScanResult`] lives only for the duration of one discovery window.
//! Both are keyed by a [`DeviceId`], the stable BLE address (or serial)
//! reported by the underlying stack.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// Unique identifier for a device.
///
/// This is the stable BLE address or serial string reported by the
/// transport. Identifiers are unique within the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Create a device ID from any string-like value
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get a short form of the identifier (at most 8 characters)
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A device known to the registry
///
/// Records survive process restarts; the registry round-trips them through
/// the string-list storage collaborator via [`DeviceRecord::to_entry`] and
/// [`DeviceRecord::from_entry`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable device identifier (unique within the registry)
    pub id: DeviceId,
    /// Human-readable name advertised by the device
    pub display_name: String,
    /// When the device was last seen or provisioned
    pub last_seen: DateTime<Utc>,
}

impl DeviceRecord {
    /// Create a new record stamped with the current time
    pub fn new(id: impl Into<DeviceId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            last_seen: Utc::now(),
        }
    }

    /// Build a record from a discovery result
    pub fn from_scan(result: &ScanResult) -> Self {
        Self::new(result.id.clone(), result.display_name.clone())
    }

    /// Refresh the last-seen timestamp
    pub fn touch(&mut self) {
        self.last_seen = Utc::now();
    }

    /// Encode this record as a single storage entry.
    ///
    /// The encoding must round-trip identifier, display name, and
    /// last-seen losslessly; one JSON object per entry does that without
    /// delimiter-escaping concerns.
    pub fn to_entry(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ProvisionError::InvalidEntry {
            reason: e.to_string(),
        })
    }

    /// Decode a record from a storage entry
    pub fn from_entry(entry: &str) -> Result<Self> {
        serde_json::from_str(entry).map_err(|e| ProvisionError::InvalidEntry {
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.display_name, self.id)
    }
}

/// A peripheral discovered during one scan window
///
/// Scan results are ephemeral: they are never persisted and their lifetime
/// is bounded to the session's `discovered` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    /// Stable device identifier
    pub id: DeviceId,
    /// Advertised name ("Unknown" when the peripheral advertises none)
    pub display_name: String,
    /// Received signal strength in dBm, when the stack reports one
    pub signal_strength: Option<i16>,
}

impl ScanResult {
    /// Create a new scan result
    pub fn new(id: impl Into<DeviceId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            signal_strength: None,
        }
    }

    /// Attach a signal strength reading
    pub fn with_signal_strength(mut self, rssi: i16) -> Self {
        self.signal_strength = Some(rssi);
        self
    }
}

impl std::fmt::Display for ScanResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.signal_strength {
            Some(rssi) => write!(f, "{} ({}, {} dBm)", self.display_name, self.id, rssi),
            None => write!(f, "{} ({})", self.display_name, self.id),
        }
    }
}
