//! Collaborator seams for the provisioning session
//!
//! The session depends only on these narrow contracts, never on a
//! specific BLE library's full surface:
//!
//! - [`BleTransport`] / [`BleConnection`] - scan for peripherals and write
//!   credentials to one of them
//! - [`PermissionGate`] - the one-time Bluetooth/location access consult
//!
//! # Feature Requirements
//!
//! - `btleplug`: enables [`BtleplugTransport`], a real backend over the
//!   `btleplug` crate. On Linux this needs BlueZ development files:
//!   ```bash
//!   apt install libdbus-1-dev
//!   ```

#[cfg(feature = "btleplug")]
mod btleplug;

#[cfg(feature = "btleplug")]
pub use self::btleplug::{provisioning_gatt, BtleplugTransport};

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use bleprov_core::{DeviceId, Result, ScanResult, WifiCredentials};

/// Trait for BLE transport backends
///
/// `scan` opens a bounded discovery window and streams results through
/// the returned channel; the sender side closes no later than the window's
/// end. The session also enforces the deadline itself, so a misbehaving
/// backend cannot hang a scan.
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Start a discovery window and stream results as they arrive
    async fn scan(&self, window: Duration) -> Result<mpsc::Receiver<ScanResult>>;

    /// Connect to a peripheral by identifier
    async fn connect(&self, id: &DeviceId) -> Result<Box<dyn BleConnection>>;
}

/// An established connection to a peripheral
#[async_trait]
pub trait BleConnection: Send {
    /// Transmit Wi-Fi credentials over the connection.
    ///
    /// Returns once the device acknowledges the write, or with an error
    /// if the transport reports failure. The caller bounds the wait.
    async fn write_credentials(&mut self, credentials: &WifiCredentials) -> Result<()>;

    /// Tear the connection down
    async fn disconnect(&mut self) -> Result<()>;
}

/// Outcome of the one-time access consult
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    /// Bluetooth and location access were granted
    Granted,
    /// Access was denied; scans will fail until settings change
    Denied,
}

impl AccessStatus {
    /// Whether access was granted
    pub fn is_granted(&self) -> bool {
        matches!(self, AccessStatus::Granted)
    }
}

impl std::fmt::Display for AccessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessStatus::Granted => write!(f, "granted"),
            AccessStatus::Denied => write!(f, "denied"),
        }
    }
}

/// Trait for the platform permission collaborator
///
/// Consulted exactly once when a session is established; the session
/// never retries the request on its own.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Request Bluetooth and location access from the platform
    async fn request_access(&self) -> Result<AccessStatus>;
}

/// Permission gate that always grants access.
///
/// Suitable for desktop platforms where no runtime permission model
/// applies, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysGranted;

#[async_trait]
impl PermissionGate for AlwaysGranted {
    async fn request_access(&self) -> Result<AccessStatus> {
        Ok(AccessStatus::Granted)
    }
}
