use crate::address::DeviceAddress;
use crate::advertising::{COMPLETE_LOCAL_NAME, FLAGS, MAX_PAYLOAD_LEN, SHORT_LOCAL_NAME};
use heapless::Vec;

/// A stable address for unit tests (displays as `11:22:33:44:55:66`).
pub const TEST_ADDRESS: DeviceAddress = DeviceAddress([0x66, 0x55, 0x44, 0x33, 0x22, 0x11]);

/// Flags-only payload, carries no name.
pub const FLAGS_ONLY: [u8; 3] = [0x02, FLAGS, 0x06];

/// Distinct address derived from an index.
pub fn address_for(index: usize) -> DeviceAddress {
    let [lo, hi, ..] = (index as u32).to_le_bytes();
    DeviceAddress([lo, hi, 0x00, 0xCC, 0xBB, 0xAA])
}

/// Build a payload with a flags structure followed by a complete local name.
pub fn named_payload(name: &str) -> Vec<u8, MAX_PAYLOAD_LEN> {
    payload_with(COMPLETE_LOCAL_NAME, name.as_bytes())
}

/// Build a payload with a flags structure followed by a shortened local name.
pub fn short_named_payload(name: &str) -> Vec<u8, MAX_PAYLOAD_LEN> {
    payload_with(SHORT_LOCAL_NAME, name.as_bytes())
}

fn payload_with(ad_type: u8, value: &[u8]) -> Vec<u8, MAX_PAYLOAD_LEN> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&FLAGS_ONLY).unwrap();
    payload.push(value.len() as u8 + 1).unwrap();
    payload.push(ad_type).unwrap();
    payload.extend_from_slice(value).unwrap();
    payload
}
