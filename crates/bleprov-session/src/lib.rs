//! BLE Wi-Fi provisioning session manager
//!
//! This crate drives a single scan → select → connect → send workflow
//! against an ESP32-class device, on top of narrow collaborator seams:
//!
//! 1. **Transport** - [`BleTransport`]/[`BleConnection`] abstract the BLE
//!    stack; the optional `btleplug` feature supplies a real backend
//! 2. **Permissions** - [`PermissionGate`], consulted once per session
//! 3. **Registry** - successful provisioning upserts the device into the
//!    `bleprov-registry` device registry
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use bleprov_core::WifiCredentials;
//! use bleprov_registry::{DeviceRegistry, JsonFileStore};
//! use bleprov_session::{
//!     AlwaysGranted, BtleplugTransport, ProvisioningSession, SessionConfig,
//! };
//!
//! #[tokio::main]
//! async fn main() -> bleprov_core::Result<()> {
//!     let registry = Arc::new(
//!         DeviceRegistry::open_default(Box::new(JsonFileStore::new("devices.json"))).await?,
//!     );
//!     let session = ProvisioningSession::establish(
//!         SessionConfig::default(),
//!         Arc::new(BtleplugTransport::new()),
//!         registry,
//!         &AlwaysGranted,
//!     )
//!     .await?;
//!
//!     let mut events = session.subscribe();
//!     session.start_scan().await?;
//!     while let Ok(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!
//!     // After the UI picks a device:
//!     // session.select_device(&id)?;
//!     // session.submit_credentials(WifiCredentials::new("HomeNet", "hunter22"))?;
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `btleplug` - real BLE backend over the `btleplug` crate (needs
//!   `libdbus-1-dev` on Linux)
//!
//! # Concurrency contract
//!
//! `start_scan` and `submit_credentials` return immediately; progress and
//! terminal outcomes arrive on the event channel in production order.
//! `cancel` is accepted from any state and suppresses outcomes of
//! abandoned attempts instead of applying them to a stale session.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod session;
pub mod test_utils;
pub mod transport;

// Re-exports for convenience
pub use config::{
    SessionConfig, SessionConfigBuilder, DEFAULT_DELIVERY_TIMEOUT, DEFAULT_EVENT_CAPACITY,
    DEFAULT_SCAN_WINDOW,
};
pub use session::{ProvisioningSession, SelectionOutcome, SessionStats};
pub use transport::{AccessStatus, AlwaysGranted, BleConnection, BleTransport, PermissionGate};

#[cfg(feature = "btleplug")]
pub use transport::BtleplugTransport;

// Re-export the core vocabulary so most callers need only this crate
pub use bleprov_core::{
    DeviceFilter, DeviceId, DeviceRecord, ProvisionError, Result, ScanResult, SessionEvent,
    SessionState, WifiCredentials,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
