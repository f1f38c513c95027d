//! Output lines for the console sink.
//!
//! Everything here renders through [`fmt::Display`] so a line can be written
//! straight into a sink without building an intermediate `String`.

use crate::address::DeviceAddress;
use heapless::Vec;
use std::fmt;
use std::time::Duration;

/// Size of the name display buffer.
pub const NAME_CAPACITY: usize = 32;

/// Terminator for every line written to the sink.
pub const LINE_END: &str = "\r\n";

/// A device name copied out of an advertisement.
///
/// Holds at most [`NAME_CAPACITY`] bytes; anything after the first NUL byte
/// is dropped since peers routinely pad names with zeros.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceName(Vec<u8, NAME_CAPACITY>);

impl DeviceName {
    pub fn from_bytes(raw: &[u8]) -> Self {
        let raw = &raw[..raw.len().min(NAME_CAPACITY)];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        // cannot fail: `end <= NAME_CAPACITY`
        Self(Vec::from_slice(&raw[..end]).unwrap_or_default())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.0.utf8_chunks() {
            f.write_str(chunk.valid())?;
            if !chunk.invalid().is_empty() {
                f.write_str("\u{FFFD}")?;
            }
        }
        Ok(())
    }
}

/// A device worth reporting: `"<address> <name> <rssi>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    pub address: DeviceAddress,
    pub name: DeviceName,
    pub rssi: i8,
}

impl fmt::Display for Discovery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.address, self.name, self.rssi)
    }
}

/// Build the report line for a discovered device. Performs no I/O.
pub fn format(address: DeviceAddress, name: &[u8], rssi: i8) -> Discovery {
    Discovery {
        address,
        name: DeviceName::from_bytes(name),
        rssi,
    }
}

/// Session status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A scan started and will last for the given window.
    Started(Duration),
    AlreadyScanning,
    Completed,
    Cancelled,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Started(window) if window.subsec_nanos() == 0 => write!(
                f,
                "Start scanning for nearby devices for {} seconds",
                window.as_secs()
            ),
            Status::Started(window) => write!(
                f,
                "Start scanning for nearby devices for {} milliseconds",
                window.as_millis()
            ),
            Status::AlreadyScanning => write!(f, "Scan already in progress"),
            Status::Completed => write!(f, "Scan completed"),
            Status::Cancelled => write!(f, "Scan cancelled"),
        }
    }
}
