//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.
//!
//! BlueZ does not expose raw advertising payloads, only the properties it
//! decoded from them. Each discovered device is therefore re-encoded into an
//! AD payload so the scan session sees the same input as from the HCI backend.

use super::{OwnedReport, REPORT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::address::DeviceAddress;
use crate::advertising::{COMPLETE_LOCAL_NAME, MAX_PAYLOAD_LEN, SHORT_LOCAL_NAME};
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::StreamExt;
use heapless::Vec;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::mpsc;
use tracing::{debug, warn};

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start receiving advertising reports using the BlueZ D-Bus backend.
///
/// This function powers the default adapter and starts LE discovery. A device
/// is reported when it appears and again whenever BlueZ updates its
/// properties, so a name learned later in the scan still reaches the session.
/// Discovery stops once the returned receiver is dropped.
pub async fn start_scan() -> Result<mpsc::Receiver<OwnedReport>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    adapter
        .set_discovery_filter(DiscoveryFilter {
            transport: DiscoveryTransport::Le,
            ..Default::default()
        })
        .await?;

    let events = adapter.discover_devices_with_changes().await?;
    let (tx, rx) = mpsc::channel(REPORT_CHANNEL_BUFFER_SIZE);

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        // Keep the D-Bus session alive by moving it into this task
        let _session = session;
        let mut events = Box::pin(events);

        loop {
            let event = tokio::select! {
                event = events.next() => event,
                _ = tx.closed() => break,
            };
            let Some(event) = event else { break };
            let Some(address) = updated_device(&event) else {
                continue;
            };

            match read_device(&adapter, address).await {
                Ok(snapshot) => match snapshot.into_report(address) {
                    Some(report) => {
                        if tx.send(report).await.is_err() {
                            break;
                        }
                    }
                    None => debug!(%address, "device not in range"),
                },
                Err(e) => warn!(%address, error = %e, "failed to read device properties"),
            }
        }
    });

    Ok(rx)
}

/// Device whose properties should be read again after `event`.
///
/// Change-aware discovery repeats `DeviceAdded` for every property update.
fn updated_device(event: &AdapterEvent) -> Option<Address> {
    match event {
        AdapterEvent::DeviceAdded(address) => Some(*address),
        _ => None,
    }
}

/// Properties BlueZ decoded for one device at one point in time.
#[derive(Debug, Default)]
struct DeviceSnapshot {
    rssi: Option<i16>,
    name: Option<String>,
    advertising_data: HashMap<u8, std::vec::Vec<u8>>,
}

impl DeviceSnapshot {
    /// Rebuild a report from the snapshot.
    ///
    /// Returns `None` for cached devices that have no current signal strength.
    fn into_report(self, address: Address) -> Option<OwnedReport> {
        let rssi = self.rssi?;
        let payload = encode_payload(self.name.as_deref(), &self.advertising_data);
        Some(OwnedReport::new(
            DeviceAddress::from(address),
            clamp_rssi(rssi),
            &payload,
        ))
    }
}

async fn read_device(adapter: &Adapter, address: Address) -> Result<DeviceSnapshot, ScanError> {
    let device = adapter.device(address)?;

    Ok(DeviceSnapshot {
        rssi: device.rssi().await?,
        name: device.name().await?,
        advertising_data: device.advertising_data().await?.unwrap_or_default(),
    })
}

fn clamp_rssi(rssi: i16) -> i8 {
    rssi.clamp(i16::from(i8::MIN), i16::from(i8::MAX)) as i8
}

/// Encode a name and raw AD fields as an advertising payload.
///
/// The name goes first. A name that does not fit is cut and marked as a
/// shortened local name. Remaining fields are added in type order while they
/// fit; name fields from `advertising_data` are skipped.
fn encode_payload(
    name: Option<&str>,
    advertising_data: &HashMap<u8, std::vec::Vec<u8>>,
) -> Vec<u8, MAX_PAYLOAD_LEN> {
    let mut payload = Vec::new();

    if let Some(name) = name {
        let room = MAX_PAYLOAD_LEN - 2;
        let (ad_type, value) = if name.len() > room {
            (SHORT_LOCAL_NAME, &name.as_bytes()[..room])
        } else {
            (COMPLETE_LOCAL_NAME, name.as_bytes())
        };
        push_structure(&mut payload, ad_type, value);
    }

    let ordered: BTreeMap<_, _> = advertising_data.iter().collect();
    for (&ad_type, value) in ordered {
        if ad_type == COMPLETE_LOCAL_NAME || ad_type == SHORT_LOCAL_NAME {
            continue;
        }
        push_structure(&mut payload, ad_type, value);
    }

    payload
}

/// Append one AD structure if it fits entirely.
fn push_structure(payload: &mut Vec<u8, MAX_PAYLOAD_LEN>, ad_type: u8, value: &[u8]) -> bool {
    if payload.len() + 2 + value.len() > MAX_PAYLOAD_LEN {
        return false;
    }
    // cannot fail after the length check above
    payload.push(value.len() as u8 + 1).is_ok()
        && payload.push(ad_type).is_ok()
        && payload.extend_from_slice(value).is_ok()
}
