//! Decoder for BLE advertising payloads.
//!
//! An advertising payload is a sequence of AD structures, each encoded as
//! `length | type | value`, where `length` counts the type byte and the
//! value. The decoder walks the payload in place and never copies.

use crate::address::DeviceAddress;
use thiserror::Error;

/// Largest legacy advertising payload the radio delivers.
pub const MAX_PAYLOAD_LEN: usize = 31;

/// AD type: flags.
pub const FLAGS: u8 = 0x01;
/// AD type: shortened local name.
pub const SHORT_LOCAL_NAME: u8 = 0x08;
/// AD type: complete local name.
pub const COMPLETE_LOCAL_NAME: u8 = 0x09;
/// AD type: manufacturer specific data.
pub const MANUFACTURER_DATA: u8 = 0xFF;

/// One received advertisement, borrowed from the radio layer for the
/// duration of a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingReport<'a> {
    pub address: DeviceAddress,
    pub rssi: i8,
    pub payload: &'a [u8],
}

/// Errors returned while looking up an AD structure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// No AD structure of the requested type exists.
    #[error("AD structure not found")]
    NotFound,
    /// An AD structure claims more bytes than the payload holds.
    #[error("AD structure extends past end of payload")]
    Truncated,
}

/// A single AD structure borrowed from a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdStructure<'a> {
    pub ad_type: u8,
    pub value: &'a [u8],
}

/// Lazy iterator over the AD structures of a payload.
///
/// Yields `Err(ParseError::Truncated)` at most once and then stops.
/// Zero-length structures are skipped.
#[derive(Debug, Clone)]
pub struct AdStructures<'a> {
    payload: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> AdStructures<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            payload,
            offset: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = Result<AdStructure<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done && self.offset < self.payload.len() {
            let len = usize::from(self.payload[self.offset]);
            if len == 0 {
                self.offset += 1;
                continue;
            }

            let end = self.offset + 1 + len;
            if end > self.payload.len() {
                self.done = true;
                return Some(Err(ParseError::Truncated));
            }

            let structure = AdStructure {
                ad_type: self.payload[self.offset + 1],
                value: &self.payload[self.offset + 2..end],
            };
            self.offset = end;
            return Some(Ok(structure));
        }

        None
    }
}

/// Find the value of the first AD structure of type `ad_type`.
///
/// The whole payload is walked even after a match, so a malformed payload is
/// rejected with `Truncated` regardless of where the requested field sits.
pub fn parse(payload: &[u8], ad_type: u8) -> Result<&[u8], ParseError> {
    let mut found = None;
    for structure in AdStructures::new(payload) {
        let structure = structure?;
        if found.is_none() && structure.ad_type == ad_type {
            found = Some(structure.value);
        }
    }
    found.ok_or(ParseError::NotFound)
}

/// Resolve the device name, preferring the complete local name over the
/// shortened one.
pub fn local_name(payload: &[u8]) -> Result<&[u8], ParseError> {
    parse(payload, COMPLETE_LOCAL_NAME).or_else(|_| parse(payload, SHORT_LOCAL_NAME))
}
