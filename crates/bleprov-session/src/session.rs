//! Provisioning session state machine
//!
//! One session drives one scan → select → connect → send workflow:
//!
//! ```text
//! Idle --start_scan--> Scanning --window closes--> AwaitingSelection
//!      (zero results: back to Idle, scan-ready)         |
//!                                            select_device (policy gate)
//!                                                       v
//!   Sending <--submit_credentials-- AwaitingCredentials
//!      |
//!      +--> Succeeded (registry add)   +--> Failed (retry or cancel)
//! ```
//!
//! `cancel()` is accepted from every state and returns to `Idle`.
//!
//! # Concurrency
//!
//! All public operations return immediately; the discovery window and the
//! delivery attempt run on spawned tasks and report through the event
//! channel. Shared state sits behind a `std::sync::Mutex` that is never
//! held across an await point. Every spawned task captures the session
//! epoch at birth and re-checks it before applying an outcome, so a
//! cancelled workflow's late completion is suppressed instead of mutating
//! a stale session or the registry.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use bleprov_core::{
    DeviceId, DeviceRecord, ProvisionError, Result, ScanResult, SessionEvent, SessionState,
    WifiCredentials,
};
use bleprov_registry::DeviceRegistry;

use crate::config::SessionConfig;
use crate::transport::{AccessStatus, BleTransport, PermissionGate};

/// Outcome of a device selection
///
/// Selection is a policy gate, not an error: an ineligible or unknown
/// selection is accepted as "viewed" and changes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionOutcome {
    /// The device is discovered and matches the target filter; the
    /// session moved to `AwaitingCredentials`
    Eligible,
    /// The device is discovered but the filter rejects it
    Ineligible,
    /// The identifier is not in the discovered list
    NotDiscovered,
}

/// Counters describing a session's lifetime
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionStats {
    /// Discovery windows opened
    pub scans_started: u64,
    /// Distinct peripherals discovered across all windows
    pub devices_discovered: u64,
    /// Repeat discovery reports coalesced by last-write-wins dedup
    pub duplicates_coalesced: u64,
    /// Delivery attempts spawned
    pub deliveries_attempted: u64,
    /// Delivery attempts that succeeded
    pub deliveries_succeeded: u64,
    /// Delivery attempts that failed or timed out
    pub deliveries_failed: u64,
    /// Outcomes dropped because the session was cancelled meanwhile
    pub stale_outcomes_suppressed: u64,
    /// Cancellations that interrupted a non-idle session
    pub cancellations: u64,
}

/// Mutable session state behind the lock
struct SessionInner {
    state: SessionState,
    /// Bumped on every cancellation; tasks carry the value from their
    /// spawn time and drop their outcome on mismatch
    epoch: u64,
    discovered: Vec<ScanResult>,
    selected: Option<DeviceRecord>,
    scan_task: Option<JoinHandle<()>>,
    deliver_task: Option<JoinHandle<()>>,
    stats: SessionStats,
}

/// A single BLE provisioning workflow
///
/// Owned by the flow that created it; drop it (or call [`cancel`]) on
/// flow exit. At most one session should be active at a time.
///
/// [`cancel`]: ProvisioningSession::cancel
pub struct ProvisioningSession {
    config: SessionConfig,
    transport: Arc<dyn BleTransport>,
    registry: Arc<DeviceRegistry>,
    access: AccessStatus,
    inner: Arc<Mutex<SessionInner>>,
    events: broadcast::Sender<SessionEvent>,
}

impl ProvisioningSession {
    /// Establish a session, consulting the permission collaborator once.
    ///
    /// A denied consult still yields a session; scans simply fail with a
    /// permission error until the user changes platform settings and a
    /// new session is established.
    pub async fn establish(
        config: SessionConfig,
        transport: Arc<dyn BleTransport>,
        registry: Arc<DeviceRegistry>,
        permissions: &dyn PermissionGate,
    ) -> Result<Self> {
        let access = permissions.request_access().await?;
        if !access.is_granted() {
            warn!("Bluetooth/location access denied; scans will be rejected");
        }

        let (events, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            config,
            transport,
            registry,
            access,
            inner: Arc::new(Mutex::new(SessionInner {
                state: SessionState::Idle,
                epoch: 0,
                discovered: Vec::new(),
                selected: None,
                scan_task: None,
                deliver_task: None,
                stats: SessionStats::default(),
            })),
            events,
        })
    }

    /// Subscribe to session events.
    ///
    /// Dropping the receiver unsubscribes; a lagging subscriber loses the
    /// oldest events, never the ordering of the ones it sees.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Peripherals discovered in the current workflow, in first-seen order
    pub fn discovered(&self) -> Vec<ScanResult> {
        self.lock().discovered.clone()
    }

    /// The selected device, if an eligible selection was made
    pub fn selected(&self) -> Option<DeviceRecord> {
        self.lock().selected.clone()
    }

    /// Lifetime counters for this session
    pub fn stats(&self) -> SessionStats {
        self.lock().stats
    }

    /// Open a bounded discovery window.
    ///
    /// Returns immediately; results stream out as
    /// [`SessionEvent::DeviceDiscovered`] and the window close as
    /// [`SessionEvent::ScanCompleted`]. Fails with a permission error if
    /// access was denied at establish time, and with an invalid-state
    /// error unless the session is scan-ready (`Idle`, `Succeeded`, or
    /// `AwaitingSelection` for a re-scan).
    pub async fn start_scan(&self) -> Result<()> {
        if !self.access.is_granted() {
            return Err(ProvisionError::PermissionDenied);
        }

        let epoch = {
            let mut inner = self.lock();
            if !inner.state.is_scan_ready() {
                return Err(ProvisionError::InvalidState {
                    operation: "start scan",
                    state: inner.state.to_string(),
                });
            }
            inner.discovered.clear();
            inner.selected = None;
            inner.stats.scans_started += 1;
            self.set_state(&mut inner, SessionState::Scanning);
            inner.epoch
        };

        let mut rx = match self.transport.scan(self.config.scan_window).await {
            Ok(rx) => rx,
            Err(e) => {
                // The window never opened; return to a scan-ready state
                let mut inner = self.lock();
                if inner.epoch == epoch {
                    self.set_state(&mut inner, SessionState::Idle);
                }
                return Err(e);
            }
        };

        let session = self.clone_refs();
        let deadline = Instant::now() + self.config.scan_window;
        let task = tokio::spawn(async move {
            loop {
                let result = match tokio::time::timeout_at(deadline, rx.recv()).await {
                    Ok(Some(result)) => result,
                    // Stream closed early or window elapsed: either way
                    // the discovery window is over
                    Ok(None) | Err(_) => break,
                };
                if !session.record_discovery(epoch, result) {
                    return;
                }
            }
            session.finish_scan(epoch);
        });

        self.lock().scan_task = Some(task);
        Ok(())
    }

    /// Select a discovered device.
    ///
    /// Only meaningful in `AwaitingSelection`. The target-device filter is
    /// a policy gate: an ineligible or unknown identifier is reported in
    /// the returned [`SelectionOutcome`] without changing state.
    pub fn select_device(&self, id: &DeviceId) -> Result<SelectionOutcome> {
        let mut inner = self.lock();
        if inner.state != SessionState::AwaitingSelection {
            return Err(ProvisionError::InvalidState {
                operation: "select device",
                state: inner.state.to_string(),
            });
        }

        let Some(result) = inner.discovered.iter().find(|r| &r.id == id).cloned() else {
            debug!(id = %id, "Selection of undiscovered device, ignoring");
            return Ok(SelectionOutcome::NotDiscovered);
        };

        if !self.config.filter.matches(&result) {
            debug!(id = %id, name = %result.display_name, "Selected device is not a provisioning target");
            return Ok(SelectionOutcome::Ineligible);
        }

        info!(id = %id, name = %result.display_name, "Device selected");
        inner.selected = Some(DeviceRecord::from_scan(&result));
        self.set_state(&mut inner, SessionState::AwaitingCredentials);
        Ok(SelectionOutcome::Eligible)
    }

    /// Submit Wi-Fi credentials for delivery to the selected device.
    ///
    /// Validation failures surface immediately and leave the state
    /// untouched. Otherwise the session enters `Sending` and spawns
    /// exactly one bounded delivery attempt; the terminal outcome arrives
    /// as a [`SessionEvent::DeliverySucceeded`] or
    /// [`SessionEvent::DeliveryFailed`]. Accepted from
    /// `AwaitingCredentials` and, for retries, from `Failed`.
    pub fn submit_credentials(&self, credentials: WifiCredentials) -> Result<()> {
        credentials.validate()?;

        let (epoch, device) = {
            let mut inner = self.lock();
            if !inner.state.accepts_credentials() {
                return Err(ProvisionError::InvalidState {
                    operation: "submit credentials",
                    state: inner.state.to_string(),
                });
            }
            let device = inner.selected.clone().ok_or(ProvisionError::Internal(
                "no device selected".to_string(),
            ))?;
            inner.stats.deliveries_attempted += 1;
            self.set_state(&mut inner, SessionState::Sending);
            (inner.epoch, device)
        };

        let session = self.clone_refs();
        let transport = Arc::clone(&self.transport);
        let timeout = self.config.delivery_timeout;
        let task = tokio::spawn(async move {
            let outcome = deliver_once(transport.as_ref(), &device.id, &credentials, timeout).await;
            session.apply_delivery_outcome(epoch, device, outcome);
        });

        self.lock().deliver_task = Some(task);
        Ok(())
    }

    /// Cancel the session and return to `Idle`.
    ///
    /// Always accepted; safe from any state including `Idle`, where it is
    /// a no-op with no observable effect. In-flight scan or delivery
    /// tasks are aborted and any outcome that still lands is suppressed.
    pub fn cancel(&self) {
        let mut inner = self.lock();
        if inner.state == SessionState::Idle {
            return;
        }

        inner.epoch += 1;
        if let Some(task) = inner.scan_task.take() {
            task.abort();
        }
        if let Some(task) = inner.deliver_task.take() {
            task.abort();
        }
        inner.discovered.clear();
        inner.selected = None;
        inner.stats.cancellations += 1;

        info!(state = %inner.state, "Session cancelled");
        self.set_state(&mut inner, SessionState::Idle);
        let _ = self.events.send(SessionEvent::Cancelled);
    }

    // ===== internals =====

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        // A poisoned lock means a panic mid-transition; propagating the
        // inner state is still sound because no invariant-breaking write
        // happens between lock and unlock without completing.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, inner: &mut SessionInner, to: SessionState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        debug!(%from, %to, "Session state changed");
        let _ = self.events.send(SessionEvent::StateChanged { from, to });
    }

    /// Cheap clone of the shared handles for a spawned task
    fn clone_refs(&self) -> SessionTaskRefs {
        SessionTaskRefs {
            inner: Arc::clone(&self.inner),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
        }
    }
}

impl Drop for ProvisioningSession {
    fn drop(&mut self) {
        // Flow exit tears the workflow down with it
        self.cancel();
    }
}

/// The handles a spawned scan/delivery task needs
#[derive(Clone)]
struct SessionTaskRefs {
    inner: Arc<Mutex<SessionInner>>,
    registry: Arc<DeviceRegistry>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionTaskRefs {
    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, inner: &mut SessionInner, to: SessionState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        debug!(%from, %to, "Session state changed");
        let _ = self.events.send(SessionEvent::StateChanged { from, to });
    }

    /// Record one discovery result; returns `false` if the scan is stale
    fn record_discovery(&self, epoch: u64, result: ScanResult) -> bool {
        let mut inner = self.lock();
        if inner.epoch != epoch || inner.state != SessionState::Scanning {
            inner.stats.stale_outcomes_suppressed += 1;
            return false;
        }

        debug!(id = %result.id.short(), name = %result.display_name, "Discovery recorded");

        // Last-write-wins dedup by identifier, first-seen order preserved
        match inner.discovered.iter_mut().find(|r| r.id == result.id) {
            Some(existing) => {
                *existing = result.clone();
                inner.stats.duplicates_coalesced += 1;
            }
            None => {
                inner.discovered.push(result.clone());
                inner.stats.devices_discovered += 1;
            }
        }

        let _ = self.events.send(SessionEvent::DeviceDiscovered(result));
        true
    }

    /// Close the discovery window and pick the follow-on state
    fn finish_scan(&self, epoch: u64) {
        let mut inner = self.lock();
        if inner.epoch != epoch || inner.state != SessionState::Scanning {
            inner.stats.stale_outcomes_suppressed += 1;
            return;
        }

        let discovered = inner.discovered.len();
        // Zero results is not an error: the session stays scan-ready
        let next = if discovered == 0 {
            SessionState::Idle
        } else {
            SessionState::AwaitingSelection
        };
        info!(discovered, "Discovery window closed");
        self.set_state(&mut inner, next);
        let _ = self.events.send(SessionEvent::ScanCompleted { discovered });
    }

    /// Apply a delivery outcome unless the session moved on meanwhile
    fn apply_delivery_outcome(&self, epoch: u64, mut device: DeviceRecord, outcome: Result<()>) {
        {
            let mut inner = self.lock();
            if inner.epoch != epoch || inner.state != SessionState::Sending {
                debug!(device = %device.id, "Dropping delivery outcome for cancelled session");
                inner.stats.stale_outcomes_suppressed += 1;
                return;
            }

            match &outcome {
                Ok(()) => {
                    inner.stats.deliveries_succeeded += 1;
                    self.set_state(&mut inner, SessionState::Succeeded);
                }
                Err(e) => {
                    inner.stats.deliveries_failed += 1;
                    warn!(device = %device.id, error = %e, "Credential delivery failed");
                    self.set_state(&mut inner, SessionState::Failed);
                    let _ = self.events.send(SessionEvent::DeliveryFailed {
                        code: e.error_code().to_string(),
                        reason: e.to_string(),
                    });
                    return;
                }
            }
        }

        // Success side effect: the provisioned device joins the registry.
        // The transition to `Succeeded` already happened under the epoch
        // check, and the write runs on a detached task whose handle is
        // never stored, so a cancel from here on can neither un-succeed
        // the delivery nor abort the durable write mid-flight.
        device.touch();
        info!(device = %device.id, "Credentials delivered");
        let refs = self.clone();
        tokio::spawn(async move {
            if let Err(e) = refs.registry.add(device.clone()).await {
                warn!(device = %device.id, error = %e, "Device provisioned but registry write failed");
            }
            let _ = refs.events.send(SessionEvent::DeliverySucceeded { record: device });
        });
    }
}

/// One bounded connect-and-write delivery attempt
async fn deliver_once(
    transport: &dyn BleTransport,
    id: &DeviceId,
    credentials: &WifiCredentials,
    timeout: std::time::Duration,
) -> Result<()> {
    let attempt = async {
        let mut connection = transport.connect(id).await?;
        let written = connection.write_credentials(credentials).await;
        // Tear down regardless; a failed disconnect never masks the
        // write outcome
        let _ = connection.disconnect().await;
        written
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(outcome) => outcome,
        Err(_) => Err(ProvisionError::DeliveryTimeout {
            duration_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfigBuilder;
    use crate::test_utils::{session_fixture, MockTransport};
    use std::time::Duration;

    #[tokio::test]
    async fn test_new_session_is_idle() {
        let (session, _registry) = session_fixture(MockTransport::new(), SessionConfig::default()).await;
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.discovered().is_empty());
        assert!(session.selected().is_none());
    }

    #[tokio::test]
    async fn test_cancel_from_idle_is_noop() {
        let (session, _registry) = session_fixture(MockTransport::new(), SessionConfig::default()).await;
        let mut events = session.subscribe();

        session.cancel();
        session.cancel();

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.stats().cancellations, 0);
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_scan_rejected_in_flight() {
        let transport = MockTransport::new()
            .with_result(ScanResult::new("X", "ESP32-X"))
            .with_hold_open(true);
        let config = SessionConfigBuilder::new()
            .scan_window(Duration::from_secs(5))
            .build();
        let (session, _registry) = session_fixture(transport, config).await;

        session.start_scan().await.unwrap();
        let err = session.start_scan().await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
        session.cancel();
    }

    #[tokio::test]
    async fn test_select_rejected_outside_awaiting_selection() {
        let (session, _registry) = session_fixture(MockTransport::new(), SessionConfig::default()).await;
        let err = session.select_device(&DeviceId::new("X")).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
    }

    #[tokio::test]
    async fn test_submit_rejected_outside_awaiting_credentials() {
        let (session, _registry) = session_fixture(MockTransport::new(), SessionConfig::default()).await;
        let err = session
            .submit_credentials(WifiCredentials::new("net", "pw"))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
    }
}
