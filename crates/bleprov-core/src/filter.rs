//! Target-device selection policy
//!
//! Which discovered peripherals are eligible for provisioning is a policy
//! decision, not a transport concern. The filter is configuration data
//! passed into the session rather than a hard-coded name check, so a
//! deployment targeting a different device family only changes its config.

use serde::{Deserialize, Serialize};

use crate::device::ScanResult;

/// Device-family tag matched by the default filter
pub const DEFAULT_FAMILY_TAG: &str = "ESP32";

/// Predicate deciding whether a discovered peripheral is a provisioning
/// target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceFilter {
    /// Accept every discovered peripheral
    Any,
    /// Accept peripherals whose advertised name contains the tag
    NameContains {
        /// Substring to look for in the advertised name
        tag: String,
    },
    /// Accept peripherals whose advertised name starts with the prefix
    NamePrefix {
        /// Required name prefix
        prefix: String,
    },
}

impl DeviceFilter {
    /// The stock filter for ESP32-family devices
    pub fn esp32() -> Self {
        DeviceFilter::NameContains {
            tag: DEFAULT_FAMILY_TAG.to_string(),
        }
    }

    /// Check whether a scan result is an eligible provisioning target
    pub fn matches(&self, result: &ScanResult) -> bool {
        match self {
            DeviceFilter::Any => true,
            DeviceFilter::NameContains { tag } => result.display_name.contains(tag.as_str()),
            DeviceFilter::NamePrefix { prefix } => {
                result.display_name.starts_with(prefix.as_str())
            }
        }
    }
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::esp32()
    }
}
