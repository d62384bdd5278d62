//! Testing utilities for the provisioning session
//!
//! Provides scripted mock collaborators so session behavior can be tested
//! without a radio: a [`MockTransport`] that replays discovery results
//! and delivery outcomes, permission stubs, and a fixture that wires a
//! session over an in-memory registry.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use bleprov_core::{DeviceId, ProvisionError, Result, ScanResult, WifiCredentials};
use bleprov_registry::{DeviceRegistry, MemoryListStore};

use crate::config::SessionConfig;
use crate::session::ProvisioningSession;
use crate::transport::{
    AccessStatus, AlwaysGranted, BleConnection, BleTransport, PermissionGate,
};

/// Scripted behavior for a delivery attempt
#[derive(Debug, Clone)]
pub enum DeliveryScript {
    /// Connect and write succeed
    Succeed,
    /// The connection attempt fails
    FailConnect(String),
    /// The connection succeeds but the write is rejected
    FailWrite(String),
    /// The write never completes (for timeout and cancellation tests)
    Hang,
}

/// Mock BLE transport replaying a scripted scan and delivery
#[derive(Clone)]
pub struct MockTransport {
    results: Vec<ScanResult>,
    result_delay: Duration,
    hold_open: bool,
    /// Per-attempt delivery scripts, consumed front to back; an empty
    /// queue means every further attempt succeeds
    delivery: Arc<Mutex<Vec<DeliveryScript>>>,
    write_delay: Duration,
    /// Identifiers passed to `connect`, in call order
    pub connects: Arc<Mutex<Vec<DeviceId>>>,
    /// Credentials written per device, in call order
    pub writes: Arc<Mutex<Vec<(DeviceId, WifiCredentials)>>>,
}

impl MockTransport {
    /// Create a transport that discovers nothing and delivers successfully
    pub fn new() -> Self {
        Self {
            results: Vec::new(),
            result_delay: Duration::ZERO,
            hold_open: false,
            delivery: Arc::new(Mutex::new(Vec::new())),
            write_delay: Duration::ZERO,
            connects: Arc::new(Mutex::new(Vec::new())),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Append one scripted discovery result
    pub fn with_result(mut self, result: ScanResult) -> Self {
        self.results.push(result);
        self
    }

    /// Append several scripted discovery results
    pub fn with_results(mut self, results: impl IntoIterator<Item = ScanResult>) -> Self {
        self.results.extend(results);
        self
    }

    /// Delay between scripted results
    pub fn with_result_delay(mut self, delay: Duration) -> Self {
        self.result_delay = delay;
        self
    }

    /// Keep the result stream open for the whole window instead of
    /// closing it after the last scripted result
    pub fn with_hold_open(mut self, hold_open: bool) -> Self {
        self.hold_open = hold_open;
        self
    }

    /// Queue the outcome of the next delivery attempt.
    ///
    /// Scripts are consumed one per attempt; once the queue is empty,
    /// attempts succeed.
    pub fn with_delivery(self, script: DeliveryScript) -> Self {
        self.delivery.lock().unwrap().push(script);
        self
    }

    /// Delay applied before the credential write completes
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Credentials written so far
    pub fn written(&self) -> Vec<(DeviceId, WifiCredentials)> {
        self.writes.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    async fn scan(&self, window: Duration) -> Result<mpsc::Receiver<ScanResult>> {
        let (tx, rx) = mpsc::channel(32);
        let results = self.results.clone();
        let delay = self.result_delay;
        let hold_open = self.hold_open;

        tokio::spawn(async move {
            for result in results {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(result).await.is_err() {
                    return;
                }
            }
            if hold_open {
                // Simulate a stack that only stops reporting at window end
                tokio::time::sleep(window).await;
            }
        });

        Ok(rx)
    }

    async fn connect(&self, id: &DeviceId) -> Result<Box<dyn BleConnection>> {
        self.connects.lock().unwrap().push(id.clone());

        let script = {
            let mut queue = self.delivery.lock().unwrap();
            if queue.is_empty() {
                DeliveryScript::Succeed
            } else {
                queue.remove(0)
            }
        };

        if let DeliveryScript::FailConnect(reason) = script {
            return Err(ProvisionError::ConnectFailed {
                device: id.to_string(),
                reason,
            });
        }

        Ok(Box::new(MockConnection {
            id: id.clone(),
            delivery: script,
            write_delay: self.write_delay,
            writes: Arc::clone(&self.writes),
        }))
    }
}

/// Connection handed out by [`MockTransport`]
pub struct MockConnection {
    id: DeviceId,
    delivery: DeliveryScript,
    write_delay: Duration,
    writes: Arc<Mutex<Vec<(DeviceId, WifiCredentials)>>>,
}

#[async_trait]
impl BleConnection for MockConnection {
    async fn write_credentials(&mut self, credentials: &WifiCredentials) -> Result<()> {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }
        match &self.delivery {
            DeliveryScript::Succeed => {
                self.writes
                    .lock()
                    .unwrap()
                    .push((self.id.clone(), credentials.clone()));
                Ok(())
            }
            DeliveryScript::FailWrite(reason) => Err(ProvisionError::DeliveryFailed {
                reason: reason.clone(),
            }),
            DeliveryScript::Hang => {
                // Held open until the caller's bound or abort fires
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ProvisionError::DeliveryFailed {
                    reason: "hung write released".to_string(),
                })
            }
            DeliveryScript::FailConnect(_) => unreachable!("connect already failed"),
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Permission gate that always denies access
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

#[async_trait]
impl PermissionGate for DenyAll {
    async fn request_access(&self) -> Result<AccessStatus> {
        Ok(AccessStatus::Denied)
    }
}

/// Build a session over an in-memory registry with access granted
pub async fn session_fixture(
    transport: MockTransport,
    config: SessionConfig,
) -> (ProvisioningSession, Arc<DeviceRegistry>) {
    let registry = Arc::new(
        DeviceRegistry::open_default(Box::new(MemoryListStore::new()))
            .await
            .expect("in-memory registry cannot fail to open"),
    );
    let session = ProvisioningSession::establish(
        config,
        Arc::new(transport),
        Arc::clone(&registry),
        &AlwaysGranted,
    )
    .await
    .expect("fixture session establishes");
    (session, registry)
}
