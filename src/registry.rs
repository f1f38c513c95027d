//! Per-session record of devices that have already been reported.
//!
//! The registry has a fixed capacity and never allocates. Once it is full,
//! further addresses are simply not recorded, which means those devices are
//! reported again every time they advertise.

use crate::address::DeviceAddress;
use heapless::Vec;

/// Maximum number of devices remembered during one scan session.
pub const REGISTRY_CAPACITY: usize = 250;

/// Insertion-ordered set of device addresses with a fixed capacity.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    seen: Vec<DeviceAddress, REGISTRY_CAPACITY>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { seen: Vec::new() }
    }

    /// Linear membership test.
    pub fn contains(&self, address: &DeviceAddress) -> bool {
        self.seen.iter().any(|seen| seen == address)
    }

    /// Record `address` as seen.
    ///
    /// Returns `false` without modifying the registry if the address is
    /// already present or the registry is full.
    pub fn try_add(&mut self, address: DeviceAddress) -> bool {
        if self.contains(&address) {
            return false;
        }
        self.seen.push(address).is_ok()
    }

    /// Forget every recorded address.
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.seen.is_full()
    }

    /// Recorded addresses in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &DeviceAddress> {
        self.seen.iter()
    }
}
