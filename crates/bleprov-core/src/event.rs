//! Session states and the events announcing them
//!
//! A provisioning session publishes [`SessionEvent`]s over a broadcast
//! channel: the UI subscribes, renders progress, and drops its receiver to
//! unsubscribe. Events are delivered in the order the session produces
//! them; discovery events in particular follow the order the underlying
//! BLE stack reported the peripherals.

use serde::{Deserialize, Serialize};

use crate::device::{DeviceRecord, ScanResult};

/// Observable status of a provisioning session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No workflow in progress; scanning may begin
    Idle,
    /// A discovery window is open and results are streaming in
    Scanning,
    /// The discovery window closed with results; waiting for a selection
    AwaitingSelection,
    /// An eligible device is selected; waiting for credentials
    AwaitingCredentials,
    /// A delivery attempt is in flight
    Sending,
    /// The last delivery attempt succeeded
    Succeeded,
    /// The last delivery attempt failed; credentials may be resubmitted
    Failed,
}

impl SessionState {
    /// Whether a new scan may be started from this state
    ///
    /// `Succeeded` and `AwaitingSelection` are scan-ready: a finished
    /// workflow and an unanswered selection list both allow a re-scan.
    pub fn is_scan_ready(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Succeeded | SessionState::AwaitingSelection
        )
    }

    /// Whether credentials may be submitted from this state
    ///
    /// `Failed` allows resubmission so the caller can retry with the same
    /// or edited credentials.
    pub fn accepts_credentials(&self) -> bool {
        matches!(
            self,
            SessionState::AwaitingCredentials | SessionState::Failed
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Scanning => write!(f, "scanning"),
            SessionState::AwaitingSelection => write!(f, "awaiting selection"),
            SessionState::AwaitingCredentials => write!(f, "awaiting credentials"),
            SessionState::Sending => write!(f, "sending"),
            SessionState::Succeeded => write!(f, "succeeded"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// An event published by a provisioning session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The session moved between states
    StateChanged {
        /// State before the transition
        from: SessionState,
        /// State after the transition
        to: SessionState,
    },
    /// A peripheral was discovered (or re-reported with fresh data)
    DeviceDiscovered(ScanResult),
    /// The discovery window closed
    ScanCompleted {
        /// Number of distinct peripherals discovered
        discovered: usize,
    },
    /// Credentials were delivered and the device was added to the registry
    DeliverySucceeded {
        /// The provisioned device's record
        record: DeviceRecord,
    },
    /// A delivery attempt ended in failure
    DeliveryFailed {
        /// Error code of the failure (see `ProvisionError::error_code`)
        code: String,
        /// Human-readable failure description
        reason: String,
    },
    /// The session was cancelled and returned to idle
    Cancelled,
}
