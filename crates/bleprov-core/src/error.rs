//! Error types for provisioning operations
//!
//! One taxonomy covers the registry and the session: permission failures,
//! storage failures, credential validation, transport/delivery failures,
//! and timeouts. No error here is fatal to the process; every failure
//! leaves the session in a well-defined, re-enterable state.

use thiserror::Error;

/// Main error type for provisioning operations
#[derive(Error, Debug)]
pub enum ProvisionError {
    // ===== Permission Errors =====
    /// Bluetooth/location access was denied at startup
    #[error("Bluetooth or location access denied")]
    PermissionDenied,

    // ===== Storage Errors =====
    /// Durable storage could not be read or written
    #[error("Storage unavailable: {reason}")]
    StorageUnavailable {
        /// What the storage backend reported
        reason: String,
    },

    /// A persisted entry could not be encoded or decoded
    #[error("Invalid registry entry: {reason}")]
    InvalidEntry {
        /// Decode/encode failure detail
        reason: String,
    },

    // ===== Validation Errors =====
    /// The SSID failed validation (empty or over-long)
    #[error("Invalid SSID: {reason}")]
    InvalidSsid {
        /// Why the SSID was rejected
        reason: String,
    },

    /// The password exceeds the WPA2 passphrase limit
    #[error("Password too long: {len} bytes exceeds maximum of {max}")]
    PasswordTooLong {
        /// Actual password length in bytes
        len: usize,
        /// Maximum allowed length
        max: usize,
    },

    // ===== Transport Errors =====
    /// Connecting to the selected device failed
    #[error("Failed to connect to device {device}: {reason}")]
    ConnectFailed {
        /// Target device identifier
        device: String,
        /// Connection failure detail
        reason: String,
    },

    /// The credential write was not acknowledged by the device
    #[error("Credential delivery failed: {reason}")]
    DeliveryFailed {
        /// Delivery failure detail
        reason: String,
    },

    /// The delivery wait exceeded its bound
    #[error("Credential delivery timed out after {duration_ms}ms")]
    DeliveryTimeout {
        /// Timeout duration in milliseconds
        duration_ms: u64,
    },

    /// The underlying scan could not be started
    #[error("Scan failed: {reason}")]
    ScanFailed {
        /// Scan failure detail
        reason: String,
    },

    // ===== Session Errors =====
    /// An operation was requested in a state that does not allow it
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        /// The requested operation
        operation: &'static str,
        /// The session state at the time of the request
        state: String,
    },

    // ===== General Errors =====
    /// An internal channel was closed before the operation completed
    #[error("Channel closed")]
    ChannelClosed,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProvisionError {
    /// Check if this error is recoverable without leaving the session
    ///
    /// Retriable errors return the session to a state the caller can
    /// re-enter (re-prompt, retry delivery). Permission denial is not
    /// retriable without a settings change.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ProvisionError::InvalidSsid { .. }
                | ProvisionError::PasswordTooLong { .. }
                | ProvisionError::ConnectFailed { .. }
                | ProvisionError::DeliveryFailed { .. }
                | ProvisionError::DeliveryTimeout { .. }
                | ProvisionError::ScanFailed { .. }
        )
    }

    /// Check if this error stems from credential validation
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            ProvisionError::InvalidSsid { .. } | ProvisionError::PasswordTooLong { .. }
        )
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            ProvisionError::PermissionDenied => "PERMISSION_DENIED",
            ProvisionError::StorageUnavailable { .. } => "STORAGE_UNAVAILABLE",
            ProvisionError::InvalidEntry { .. } => "INVALID_ENTRY",
            ProvisionError::InvalidSsid { .. } => "INVALID_SSID",
            ProvisionError::PasswordTooLong { .. } => "PASSWORD_TOO_LONG",
            ProvisionError::ConnectFailed { .. } => "CONNECT_FAILED",
            ProvisionError::DeliveryFailed { .. } => "DELIVERY_FAILED",
            ProvisionError::DeliveryTimeout { .. } => "DELIVERY_TIMEOUT",
            ProvisionError::ScanFailed { .. } => "SCAN_FAILED",
            ProvisionError::InvalidState { .. } => "INVALID_STATE",
            ProvisionError::ChannelClosed => "CHANNEL_CLOSED",
            ProvisionError::Internal(_) => "INTERNAL_ERROR",
            ProvisionError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;
