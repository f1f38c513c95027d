//! Raw HCI socket backend.
//!
//! This backend uses raw Linux HCI sockets to receive BLE advertisements
//! without requiring the BlueZ daemon. It requires CAP_NET_RAW and
//! CAP_NET_ADMIN capabilities or root privileges.

use super::{OwnedReport, REPORT_CHANNEL_BUFFER_SIZE, ScanError};
use crate::address::DeviceAddress;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, warn};

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const HCI_FILTER: c_int = 2;

// HCI packet types
const HCI_COMMAND_PKT: u8 = 0x01;
const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

// HCI commands
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

/// Max HCI event size
const HCI_MAX_EVENT_SIZE: usize = 258;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.extend_from_slice(&opcode.to_le_bytes());
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Parameters of LE Set Scan Parameters, little-endian on the wire.
fn scan_parameters(interval: u16, window: u16) -> [u8; 7] {
    let [interval_lo, interval_hi] = interval.to_le_bytes();
    let [window_lo, window_hi] = window.to_le_bytes();
    [
        LE_SCAN_PASSIVE,
        interval_lo,
        interval_hi,
        window_lo,
        window_hi,
        LE_PUBLIC_ADDRESS,
        FILTER_POLICY_ACCEPT_ALL,
    ]
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to create HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: 0, // HCI_CHANNEL_RAW
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to bind HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Set HCI socket filter
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            0, // SOL_HCI
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to set HCI filter: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to send HCI command: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Configure and enable passive LE scanning
fn enable_le_scan(fd: &OwnedFd) -> Result<(), ScanError> {
    // 10ms interval and window, in 0.625ms units
    let params = scan_parameters(0x0010, 0x0010);
    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_PARAMETERS, &params);
    send_hci_command(fd, &packet)?;

    // Duplicate filtering stays off; the scan session does its own dedup
    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x01, 0x00]);
    send_hci_command(fd, &packet)
}

fn disable_le_scan(fd: &OwnedFd) -> Result<(), ScanError> {
    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, &[0x00, 0x00]);
    send_hci_command(fd, &packet)
}

/// LE Advertising Report events carry between 1 and 0x19 reports.
const MAX_REPORTS_PER_EVENT: usize = 0x19;

type EventReports = heapless::Vec<OwnedReport, MAX_REPORTS_PER_EVENT>;

/// Parse every report of an LE advertising report event.
///
/// Reports follow each other back to back. Parsing stops at the first report
/// that runs past the end of the event; the ones before it are kept.
/// Addresses stay in wire order.
fn parse_advertising_reports(data: &[u8]) -> EventReports {
    let mut reports = EventReports::new();

    // Skip HCI header (packet type + event code + param len + subevent)
    let Some((&num_reports, mut rest)) = data.get(4..).and_then(|params| params.split_first()) else {
        return reports;
    };

    for _ in 0..num_reports {
        let Some((report, tail)) = next_report(rest) else {
            break;
        };
        if reports.push(report).is_err() {
            break;
        }
        rest = tail;
    }

    reports
}

/// Split one report off the front of `data`.
fn next_report(data: &[u8]) -> Option<(OwnedReport, &[u8])> {
    // event_type(1) + addr_type(1) + address(6) + data_len(1)
    let address: [u8; 6] = data.get(2..8)?.try_into().ok()?;
    let data_len = usize::from(*data.get(8)?);
    let ad_data = data.get(9..9 + data_len)?;
    let rssi = *data.get(9 + data_len)? as i8;
    let rest = data.get(10 + data_len..)?;

    Some((OwnedReport::new(DeviceAddress(address), rssi, ad_data), rest))
}

/// Start receiving advertising reports using raw HCI sockets.
///
/// This function opens a raw HCI socket, enables passive LE scanning and
/// forwards every advertising report through the returned channel. Scanning
/// is disabled again once the receiver is dropped.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An available HCI device (typically hci0)
pub async fn start_scan() -> Result<mpsc::Receiver<OwnedReport>, ScanError> {
    // Open and configure HCI socket for receiving events
    let fd = open_hci_socket()?;
    bind_hci_socket(&fd, 0)?;
    set_hci_filter(&fd)?;

    // We need a separate socket for sending commands (bound to specific device)
    let cmd_fd = open_hci_socket()?;
    bind_hci_socket(&cmd_fd, 0)?;
    enable_le_scan(&cmd_fd)?;

    let (tx, rx) = mpsc::channel(REPORT_CHANNEL_BUFFER_SIZE);

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(async move {
        let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

        'events: loop {
            let mut guard = tokio::select! {
                ready = async_fd.readable() => match ready {
                    Ok(guard) => guard,
                    Err(e) => {
                        warn!(error = %e, "HCI socket no longer readable");
                        break;
                    }
                },
                _ = tx.closed() => break,
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| {
                    let ret = unsafe {
                        libc::read(
                            inner.as_raw_fd(),
                            buf.as_mut_ptr() as *mut c_void,
                            buf.len(),
                        )
                    };
                    if ret < 0 {
                        Err(io::Error::last_os_error())
                    } else {
                        Ok(ret as usize)
                    }
                }) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,
                    Ok(Err(e)) => {
                        warn!(error = %e, "HCI read failed");
                        break 'events;
                    }
                    Err(_would_block) => break,
                };

                if n >= 4
                    && buf[0] == HCI_EVENT_PKT
                    && buf[1] == EVT_LE_META_EVENT
                    && buf[3] == EVT_LE_ADVERTISING_REPORT
                {
                    let reports = parse_advertising_reports(&buf[..n]);
                    if reports.is_empty() {
                        debug!(len = n, "malformed advertising report event");
                    }
                    for report in reports {
                        if tx.send(report).await.is_err() {
                            break 'events;
                        }
                    }
                }
            }
        }

        if let Err(e) = disable_le_scan(&cmd_fd) {
            warn!(error = %e, "failed to disable LE scan");
        }
    });

    Ok(rx)
}
