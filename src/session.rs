//! Scan session state machine.
//!
//! A [`ScanSession`] reacts to three inputs: an explicit [`ScanSession::start`],
//! advertising reports and the expiry of the scan window. Reports and the
//! timeout arrive through the [`ScanObserver`] trait; commands go back to the
//! radio through [`RadioControl`].
//!
//! The event handlers run in the radio's callback context. They never block,
//! never allocate and do an amount of work bounded by the registry capacity.

use crate::advertising::{self, AdvertisingReport};
use crate::registry::DeviceRegistry;
use crate::report::{self, LINE_END, Status};
use std::io::{self, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace};

/// Length of a scan window unless overridden.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(30);

/// Commands a session issues to the radio layer.
pub trait RadioControl {
    fn begin_receiving_reports(&mut self);
    fn stop_receiving_reports(&mut self);
    /// Arm the one-shot scan timer.
    fn arm_timeout(&mut self, after: Duration);
    fn disarm_timeout(&mut self);
}

/// Events the radio layer delivers to a session.
pub trait ScanObserver {
    fn on_report(&mut self, report: &AdvertisingReport<'_>) -> io::Result<()>;
    fn on_timeout(&mut self) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
}

/// Errors returned by [`ScanSession::start`].
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("scan already in progress")]
    AlreadyScanning,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The discovery state machine.
///
/// Owns the per-session [`DeviceRegistry`], a handle to the radio and the
/// line sink that receives report and status lines.
#[derive(Debug)]
pub struct ScanSession<R, W> {
    state: ScanState,
    registry: DeviceRegistry,
    window: Duration,
    radio: R,
    sink: W,
}

impl<R: RadioControl, W: Write> ScanSession<R, W> {
    pub fn new(radio: R, sink: W) -> Self {
        Self {
            state: ScanState::Idle,
            registry: DeviceRegistry::new(),
            window: DEFAULT_SCAN_WINDOW,
            radio,
            sink,
        }
    }

    /// Use a scan window other than [`DEFAULT_SCAN_WINDOW`].
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Begin a new scan session.
    ///
    /// Clears the registry, asks the radio for reports and arms the scan
    /// timer. Rejected with [`SessionError::AlreadyScanning`] while a scan is
    /// running; the running scan is left untouched.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state == ScanState::Scanning {
            self.write_status(Status::AlreadyScanning)?;
            return Err(SessionError::AlreadyScanning);
        }

        self.registry.reset();
        self.state = ScanState::Scanning;
        self.radio.begin_receiving_reports();
        self.radio.arm_timeout(self.window);
        info!(window = ?self.window, "scan started");

        self.write_status(Status::Started(self.window))?;
        Ok(())
    }

    /// Abort a running scan. Does nothing while idle.
    pub fn cancel(&mut self) -> io::Result<()> {
        if self.state != ScanState::Scanning {
            return Ok(());
        }
        self.finish();
        info!(devices = self.registry.len(), "scan cancelled");
        self.write_status(Status::Cancelled)
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn into_parts(self) -> (R, W) {
        (self.radio, self.sink)
    }

    fn finish(&mut self) {
        self.radio.stop_receiving_reports();
        self.radio.disarm_timeout();
        self.state = ScanState::Idle;
    }

    fn write_status(&mut self, status: Status) -> io::Result<()> {
        write!(self.sink, "{status}{LINE_END}")
    }
}

impl<R: RadioControl, W: Write> ScanObserver for ScanSession<R, W> {
    fn on_report(&mut self, report: &AdvertisingReport<'_>) -> io::Result<()> {
        if self.state != ScanState::Scanning {
            return Ok(());
        }
        if self.registry.contains(&report.address) {
            trace!(address = %report.address, "already reported");
            return Ok(());
        }

        let name = match advertising::local_name(report.payload) {
            Ok(name) => name,
            Err(error) => {
                trace!(address = %report.address, %error, "no usable name");
                return Ok(());
            }
        };

        let line = report::format(report.address, name, report.rssi);
        write!(self.sink, "{line}{LINE_END}")?;

        if !self.registry.try_add(report.address) {
            debug!(address = %report.address, "registry full, device will be reported again");
        }
        Ok(())
    }

    fn on_timeout(&mut self) -> io::Result<()> {
        if self.state != ScanState::Scanning {
            debug!("stale scan timeout ignored");
            return Ok(());
        }
        self.finish();
        info!(devices = self.registry.len(), "scan completed");
        self.write_status(Status::Completed)
    }
}
