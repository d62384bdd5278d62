//! btleplug-backed BLE transport
//!
//! Discovery uses snapshot polling: the adapter scans for the whole
//! window while this backend samples `peripherals()` on an interval and
//! forwards new or changed results. Credential delivery connects to the
//! peripheral and writes the provisioning GATT characteristics with
//! response.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};
use uuid::{uuid, Uuid};

use bleprov_core::{DeviceId, ProvisionError, Result, ScanResult, WifiCredentials};

use super::{BleConnection, BleTransport};

/// GATT contract exposed by the target device family for provisioning
pub mod provisioning_gatt {
    use super::{uuid, Uuid};

    /// Provisioning service UUID
    pub const SERVICE: Uuid = uuid!("b40e1000-5e7c-1c3e-0000-000000000000");

    /// Wi-Fi SSID characteristic (write)
    pub const WIFI_SSID: Uuid = uuid!("b40e1001-5e7c-1c3e-0000-000000000000");

    /// Wi-Fi password characteristic (write)
    pub const WIFI_PASSWORD: Uuid = uuid!("b40e1002-5e7c-1c3e-0000-000000000000");

    /// Command characteristic (write)
    pub const COMMAND: Uuid = uuid!("b40e1003-5e7c-1c3e-0000-000000000000");

    /// Command byte: save the written credentials and restart
    pub const COMMAND_PROVISION: u8 = 0x02;
}

/// How often the scan task samples the adapter's peripheral snapshot
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Discovery window used to locate a peripheral before connecting
const CONNECT_DISCOVERY_WINDOW: Duration = Duration::from_secs(2);

/// BLE transport over the system Bluetooth adapter
#[derive(Debug, Default)]
pub struct BtleplugTransport;

impl BtleplugTransport {
    /// Create a transport using the default adapter
    pub fn new() -> Self {
        Self
    }

    async fn adapter() -> Result<Adapter> {
        let manager = Manager::new().await.map_err(|e| ProvisionError::ScanFailed {
            reason: format!("bluetooth manager: {}", e),
        })?;
        let adapters = manager.adapters().await.map_err(|e| ProvisionError::ScanFailed {
            reason: format!("enumerate adapters: {}", e),
        })?;
        adapters
            .into_iter()
            .next()
            .ok_or_else(|| ProvisionError::ScanFailed {
                reason: "no Bluetooth adapter found".to_string(),
            })
    }

    async fn snapshot(adapter: &Adapter) -> Vec<ScanResult> {
        let peripherals = match adapter.peripherals().await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Failed to list peripherals");
                return Vec::new();
            }
        };

        let mut results = Vec::with_capacity(peripherals.len());
        for peripheral in peripherals {
            match peripheral.properties().await {
                Ok(Some(props)) => {
                    let name = props.local_name.unwrap_or_else(|| "Unknown".to_string());
                    let mut result = ScanResult::new(peripheral.address().to_string(), name);
                    if let Some(rssi) = props.rssi {
                        result = result.with_signal_strength(rssi);
                    }
                    results.push(result);
                }
                Ok(None) => {}
                Err(e) => trace!(error = %e, "Skipping peripheral without properties"),
            }
        }
        results
    }

    async fn find_peripheral(adapter: &Adapter, id: &DeviceId) -> Result<Peripheral> {
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ProvisionError::ConnectFailed {
                device: id.to_string(),
                reason: format!("start discovery: {}", e),
            })?;
        tokio::time::sleep(CONNECT_DISCOVERY_WINDOW).await;

        let peripherals = adapter.peripherals().await.map_err(|e| ProvisionError::ConnectFailed {
            device: id.to_string(),
            reason: format!("list peripherals: {}", e),
        })?;
        let _ = adapter.stop_scan().await;

        peripherals
            .into_iter()
            .find(|p| p.address().to_string() == id.as_str())
            .ok_or_else(|| ProvisionError::ConnectFailed {
                device: id.to_string(),
                reason: "peripheral not in range".to_string(),
            })
    }
}

#[async_trait]
impl BleTransport for BtleplugTransport {
    async fn scan(&self, window: Duration) -> Result<mpsc::Receiver<ScanResult>> {
        let adapter = Self::adapter().await?;
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ProvisionError::ScanFailed {
                reason: format!("start scan: {}", e),
            })?;

        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let deadline = Instant::now() + window;
            let mut seen: HashMap<DeviceId, ScanResult> = HashMap::new();

            loop {
                for result in Self::snapshot(&adapter).await {
                    let changed = seen.get(&result.id) != Some(&result);
                    if changed {
                        seen.insert(result.id.clone(), result.clone());
                        if tx.send(result).await.is_err() {
                            // Receiver dropped; the window was cancelled
                            let _ = adapter.stop_scan().await;
                            return;
                        }
                    }
                }

                if Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep_until(deadline.min(Instant::now() + SCAN_POLL_INTERVAL)).await;
            }

            if let Err(e) = adapter.stop_scan().await {
                warn!(error = %e, "Failed to stop scan");
            }
            debug!(discovered = seen.len(), "Discovery window closed");
        });

        Ok(rx)
    }

    async fn connect(&self, id: &DeviceId) -> Result<Box<dyn BleConnection>> {
        let adapter = Self::adapter().await.map_err(|e| ProvisionError::ConnectFailed {
            device: id.to_string(),
            reason: e.to_string(),
        })?;
        let peripheral = Self::find_peripheral(&adapter, id).await?;

        peripheral.connect().await.map_err(|e| ProvisionError::ConnectFailed {
            device: id.to_string(),
            reason: e.to_string(),
        })?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| ProvisionError::ConnectFailed {
                device: id.to_string(),
                reason: format!("service discovery: {}", e),
            })?;

        let characteristics = peripheral.characteristics();
        let find = |uuid: Uuid, label: &str| -> Result<Characteristic> {
            characteristics
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| ProvisionError::ConnectFailed {
                    device: id.to_string(),
                    reason: format!("{} characteristic not found", label),
                })
        };

        let ssid_char = find(provisioning_gatt::WIFI_SSID, "SSID")?;
        let password_char = find(provisioning_gatt::WIFI_PASSWORD, "password")?;
        let command_char = find(provisioning_gatt::COMMAND, "command")?;

        debug!(device = %id, "Connected and discovered provisioning service");
        Ok(Box::new(BtleplugConnection {
            peripheral,
            ssid_char,
            password_char,
            command_char,
        }))
    }
}

/// Connection to a peripheral exposing the provisioning GATT service
pub struct BtleplugConnection {
    peripheral: Peripheral,
    ssid_char: Characteristic,
    password_char: Characteristic,
    command_char: Characteristic,
}

#[async_trait]
impl BleConnection for BtleplugConnection {
    async fn write_credentials(&mut self, credentials: &WifiCredentials) -> Result<()> {
        let write = |characteristic: &Characteristic, payload: Vec<u8>| {
            let peripheral = self.peripheral.clone();
            let characteristic = characteristic.clone();
            async move {
                peripheral
                    .write(&characteristic, &payload, WriteType::WithResponse)
                    .await
                    .map_err(|e| ProvisionError::DeliveryFailed {
                        reason: e.to_string(),
                    })
            }
        };

        write(&self.ssid_char, credentials.ssid.as_bytes().to_vec()).await?;
        write(&self.password_char, credentials.password.as_bytes().to_vec()).await?;
        write(
            &self.command_char,
            vec![provisioning_gatt::COMMAND_PROVISION],
        )
        .await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.peripheral
            .disconnect()
            .await
            .map_err(|e| ProvisionError::DeliveryFailed {
                reason: format!("disconnect: {}", e),
            })
    }
}
