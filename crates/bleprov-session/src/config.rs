//! Configuration for provisioning sessions
//!
//! Covers the discovery window, the delivery wait bound, the event
//! channel capacity, and the target-device filter policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use bleprov_core::DeviceFilter;

/// Default bounded discovery window
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(5);

/// Default bound on a credential-delivery attempt
pub const DEFAULT_DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default capacity of the session event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Configuration for a provisioning session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a discovery window stays open
    #[serde(with = "humantime_serde", default = "default_scan_window")]
    pub scan_window: Duration,

    /// Upper bound on one connect-and-write delivery attempt
    #[serde(with = "humantime_serde", default = "default_delivery_timeout")]
    pub delivery_timeout: Duration,

    /// Capacity of the broadcast channel carrying session events
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Which discovered peripherals are eligible for provisioning
    #[serde(default)]
    pub filter: DeviceFilter,
}

fn default_scan_window() -> Duration {
    DEFAULT_SCAN_WINDOW
}

fn default_delivery_timeout() -> Duration {
    DEFAULT_DELIVERY_TIMEOUT
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_window: DEFAULT_SCAN_WINDOW,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            filter: DeviceFilter::default(),
        }
    }
}

/// Builder for [`SessionConfig`]
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the discovery window
    pub fn scan_window(mut self, window: Duration) -> Self {
        self.config.scan_window = window;
        self
    }

    /// Set the delivery timeout
    pub fn delivery_timeout(mut self, timeout: Duration) -> Self {
        self.config.delivery_timeout = timeout;
        self
    }

    /// Set the event channel capacity (clamped to at least 1)
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    /// Set the target-device filter
    pub fn filter(mut self, filter: DeviceFilter) -> Self {
        self.config.filter = filter;
        self
    }

    /// Build the configuration
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
