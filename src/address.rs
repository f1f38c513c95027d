//! Bluetooth device address as delivered by the radio.
//!
//! The radio hands addresses over in little-endian (wire) order. This type
//! keeps that order and only reverses it when rendering for humans.

use std::fmt;

/// A 6-byte Bluetooth device address in wire order.
///
/// Equality is byte-wise. There is deliberately no ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceAddress(pub [u8; 6]);

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

impl From<[u8; 6]> for DeviceAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

/// BlueZ keeps addresses in display order, most significant byte first.
#[cfg(feature = "bluer")]
impl From<bluer::Address> for DeviceAddress {
    fn from(addr: bluer::Address) -> Self {
        let mut bytes = addr.0;
        bytes.reverse();
        Self(bytes)
    }
}
