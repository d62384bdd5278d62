//! Wi-Fi credentials and validation rules
//!
//! Validation happens before a delivery attempt is ever made: an empty
//! SSID is rejected locally, an empty password is allowed (open networks).
//! Length limits follow IEEE 802.11: an SSID is at most 32 octets and a
//! WPA2 passphrase at most 64.

use serde::{Deserialize, Serialize};

use crate::error::{ProvisionError, Result};

/// Maximum SSID length in bytes (IEEE 802.11)
pub const MAX_SSID_LEN: usize = 32;

/// Maximum WPA2 passphrase length in bytes
pub const MAX_PASSWORD_LEN: usize = 64;

/// Wi-Fi credentials destined for a device
///
/// The `Debug` impl redacts the password so credentials can be logged
/// without leaking secrets.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiCredentials {
    /// Network name
    pub ssid: String,
    /// Network password; may be empty for open networks
    pub password: String,
}

impl WifiCredentials {
    /// Create credentials from SSID and password
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }

    /// Credentials for an open network (empty password)
    pub fn open(ssid: impl Into<String>) -> Self {
        Self::new(ssid, "")
    }

    /// Validate the credentials.
    ///
    /// Fails with a validation error if the SSID is empty or over-long,
    /// or if the password exceeds the WPA2 passphrase limit. An empty
    /// password is valid.
    pub fn validate(&self) -> Result<()> {
        if self.ssid.is_empty() {
            return Err(ProvisionError::InvalidSsid {
                reason: "SSID must not be empty".to_string(),
            });
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ProvisionError::InvalidSsid {
                reason: format!(
                    "SSID is {} bytes, maximum is {}",
                    self.ssid.len(),
                    MAX_SSID_LEN
                ),
            });
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(ProvisionError::PasswordTooLong {
                len: self.password.len(),
                max: MAX_PASSWORD_LEN,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_credentials() {
        assert!(WifiCredentials::new("HomeNet", "hunter22").validate().is_ok());
    }

    #[test]
    fn test_empty_password_is_valid() {
        assert!(WifiCredentials::open("CoffeeShop").validate().is_ok());
    }

    #[test]
    fn test_empty_ssid_rejected() {
        let err = WifiCredentials::new("", "pw").validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_SSID");
        assert!(err.is_validation_error());
    }

    #[test]
    fn test_overlong_ssid_rejected() {
        let err = WifiCredentials::new("x".repeat(MAX_SSID_LEN + 1), "pw")
            .validate()
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_SSID");
    }

    #[test]
    fn test_overlong_password_rejected() {
        let err = WifiCredentials::new("net", "x".repeat(MAX_PASSWORD_LEN + 1))
            .validate()
            .unwrap_err();
        assert_eq!(err.error_code(), "PASSWORD_TOO_LONG");
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = WifiCredentials::new("HomeNet", "topsecret");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("HomeNet"));
        assert!(!debug.contains("topsecret"));
    }
}
