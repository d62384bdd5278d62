//! Durable device registry for BLE Wi-Fi provisioning
//!
//! This crate persists the set of devices a user has provisioned or saved.
//!
//! ## Components
//!
//! - **store**: the narrow string-list storage contract
//!   ([`ListStore`]) with in-memory and JSON-file implementations
//! - **registry**: the write-through [`DeviceRegistry`] with serialized
//!   mutations and first-insert ordering
//!
//! ## Example
//!
//! ```ignore
//! use bleprov_registry::{DeviceRegistry, JsonFileStore};
//! use bleprov_core::DeviceRecord;
//!
//! #[tokio::main]
//! async fn main() -> bleprov_core::Result<()> {
//!     let store = Box::new(JsonFileStore::new("devices.json"));
//!     let registry = DeviceRegistry::open_default(store).await?;
//!
//!     registry.add(DeviceRecord::new("AA:BB:CC:DD:EE:FF", "ESP32-1")).await?;
//!     for record in registry.list().await {
//!         println!("{}", record);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod registry;
pub mod store;

// Re-exports for convenience
pub use registry::{DeviceRegistry, DEFAULT_REGISTRY_KEY};
pub use store::{JsonFileStore, ListStore, MemoryListStore};
