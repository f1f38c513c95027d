//! Radio backends that feed advertising reports into a scan session.
//!
//! Each backend owns its Bluetooth resources inside a spawned task and copies
//! every received advertisement into an [`OwnedReport`] before handing it
//! over a channel.

#[cfg(feature = "bluer")]
pub mod bluer;

#[cfg(feature = "hci")]
pub mod hci;

use crate::address::DeviceAddress;
use crate::advertising::{AdvertisingReport, MAX_PAYLOAD_LEN};
use heapless::Vec;
use thiserror::Error;
use tokio::sync::mpsc;

/// Channel buffer size for advertising reports.
pub const REPORT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
}

/// An advertising report copied out of the radio layer's buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedReport {
    pub address: DeviceAddress,
    pub rssi: i8,
    pub payload: Vec<u8, MAX_PAYLOAD_LEN>,
}

impl OwnedReport {
    /// Copy a report, keeping at most [`MAX_PAYLOAD_LEN`] payload bytes.
    pub fn new(address: DeviceAddress, rssi: i8, payload: &[u8]) -> Self {
        let payload = &payload[..payload.len().min(MAX_PAYLOAD_LEN)];
        Self {
            address,
            rssi,
            payload: Vec::from_slice(payload).unwrap_or_default(),
        }
    }

    pub fn as_report(&self) -> AdvertisingReport<'_> {
        AdvertisingReport {
            address: self.address,
            rssi: self.rssi,
            payload: &self.payload,
        }
    }
}

/// Available scanner backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Backend {
    /// BlueZ D-Bus backend (requires bluetoothd daemon)
    #[cfg(feature = "bluer")]
    #[value(alias = "bluez")]
    Bluer,
    /// Raw HCI socket backend (direct kernel access, no daemon required)
    #[cfg(feature = "hci")]
    #[value(alias = "raw")]
    Hci,
}

impl Default for Backend {
    fn default() -> Self {
        #[cfg(feature = "bluer")]
        return Backend::Bluer;
        #[cfg(all(feature = "hci", not(feature = "bluer")))]
        return Backend::Hci;
        #[cfg(not(any(feature = "bluer", feature = "hci")))]
        compile_error!("At least one backend feature must be enabled");
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(feature = "bluer")]
            Backend::Bluer => write!(f, "bluer"),
            #[cfg(feature = "hci")]
            Backend::Hci => write!(f, "hci"),
        }
    }
}

/// Start receiving advertising reports from the specified backend.
///
/// The backend scans until the returned receiver is dropped.
pub async fn start_scan(backend: Backend) -> Result<mpsc::Receiver<OwnedReport>, ScanError> {
    match backend {
        #[cfg(feature = "bluer")]
        Backend::Bluer => bluer::start_scan().await,
        #[cfg(feature = "hci")]
        Backend::Hci => hci::start_scan().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TEST_ADDRESS;
    use clap::ValueEnum;

    #[test]
    fn test_owned_report_copies_payload() {
        let payload = [0x02, 0x01, 0x06];
        let owned = OwnedReport::new(TEST_ADDRESS, -70, &payload);
        let report = owned.as_report();
        assert_eq!(report.address, TEST_ADDRESS);
        assert_eq!(report.rssi, -70);
        assert_eq!(report.payload, &payload[..]);
    }

    #[test]
    fn test_owned_report_clamps_oversized_payload() {
        let payload = [0xAB; 40];
        let owned = OwnedReport::new(TEST_ADDRESS, 0, &payload);
        assert_eq!(owned.payload.len(), MAX_PAYLOAD_LEN);
    }

    #[test]
    fn test_scan_error_display() {
        let err = ScanError::Bluetooth("adapter off".to_string());
        assert_eq!(format!("{}", err), "Bluetooth error: adapter off");
    }

    #[cfg(all(feature = "bluer", feature = "hci"))]
    #[test]
    fn test_backend_from_str() {
        assert_eq!(Backend::from_str("bluer", false).unwrap(), Backend::Bluer);
        assert_eq!(Backend::from_str("BlueZ", true).unwrap(), Backend::Bluer);
        assert_eq!(Backend::from_str("hci", false).unwrap(), Backend::Hci);
        assert_eq!(Backend::from_str("raw", false).unwrap(), Backend::Hci);
        assert!(Backend::from_str("invalid", true).is_err());
    }

    #[cfg(all(feature = "bluer", feature = "hci"))]
    #[test]
    fn test_backend_display() {
        assert_eq!(format!("{}", Backend::Bluer), "bluer");
        assert_eq!(format!("{}", Backend::Hci), "hci");
    }
}
