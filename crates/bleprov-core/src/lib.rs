//! Core domain types for BLE Wi-Fi provisioning
//!
//! This crate holds the types shared between the device registry and the
//! provisioning session:
//!
//! - **device**: device identifiers, persisted device records, ephemeral
//!   scan results
//! - **filter**: the target-device policy predicate applied during selection
//! - **credentials**: Wi-Fi credentials and their validation rules
//! - **error**: the error taxonomy for every provisioning operation
//! - **event**: session events published to subscribers
//!
//! Nothing in this crate touches a radio or a disk; it is pure data and
//! policy, consumed by `bleprov-registry` and `bleprov-session`.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod credentials;
pub mod device;
pub mod error;
pub mod event;
pub mod filter;

// Re-exports for convenience
pub use credentials::WifiCredentials;
pub use device::{DeviceId, DeviceRecord, ScanResult};
pub use error::{ProvisionError, Result};
pub use event::{SessionEvent, SessionState};
pub use filter::DeviceFilter;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
