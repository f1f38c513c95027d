//! `ble-nearby-scan` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit codes.
//! The discovery pipeline lives in [`crate::session`], fed by the radio
//! backends in [`crate::scanner`] and driven by [`crate::app`], where it can be
//! tested deterministically with an injected scanner and output stream.

pub mod address;
pub mod advertising;
pub mod app;
pub mod duration;
pub mod logging;
pub mod registry;
pub mod report;
pub mod scanner;
pub mod session;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use address::DeviceAddress;
pub use advertising::{AdStructure, AdStructures, AdvertisingReport, ParseError, local_name, parse};
pub use registry::{DeviceRegistry, REGISTRY_CAPACITY};
pub use report::{DeviceName, Discovery, Status};
pub use scanner::{Backend, OwnedReport, ScanError};
pub use session::{
    DEFAULT_SCAN_WINDOW, RadioControl, ScanObserver, ScanSession, ScanState, SessionError,
};
