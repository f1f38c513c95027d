//! Core application runner (business logic) for `ble-nearby-scan`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically: the radio is injected through the
//! [`Scanner`] trait and the scan window runs on `tokio` time, which tests pause.

use crate::scanner::{Backend, OwnedReport, ScanError};
use crate::session::{RadioControl, ScanObserver, ScanSession, ScanState, SessionError};
use clap::Parser;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::warn;

/// Configuration for a scan run.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// How long to scan for.
    /// Accepts duration with suffix: 30s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, default_value = "30s", value_parser = crate::duration::parse_duration)]
    pub duration: Duration,

    /// Verbose output, log discarded advertisements to stderr
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Errors returned by the core run loop.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<OwnedReport>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<OwnedReport>, ScanError>> + Send + '_>>
    {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

/// Radio control for the channel-fed backends.
///
/// Backends keep scanning for as long as their channel is open, so "stop
/// receiving" gates delivery here instead. The one-shot timer is a deadline
/// the run loop sleeps on.
#[derive(Debug, Default)]
pub struct ChannelRadio {
    receiving: bool,
    deadline: Option<Instant>,
}

impl ChannelRadio {
    pub fn is_receiving(&self) -> bool {
        self.receiving
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

impl RadioControl for ChannelRadio {
    fn begin_receiving_reports(&mut self) {
        self.receiving = true;
    }

    fn stop_receiving_reports(&mut self) {
        self.receiving = false;
    }

    fn arm_timeout(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    fn disarm_timeout(&mut self) {
        self.deadline = None;
    }
}

/// Run one scan session, writing report and status lines to `out`.
///
/// Returns when the scan window expires or, after cancelling the session,
/// when `shutdown` resolves. A report stream that closes early does not end
/// the session; the window still runs to completion.
pub async fn run_with_io<F>(
    options: Options,
    scanner: &dyn Scanner,
    out: &mut dyn Write,
    shutdown: F,
) -> Result<(), RunError>
where
    F: Future<Output = ()>,
{
    let mut reports = scanner.start_scan(options.backend).await?;
    let mut session = ScanSession::new(ChannelRadio::default(), out).with_window(options.duration);
    session.start()?;

    let mut reports_open = true;
    tokio::pin!(shutdown);

    while session.state() == ScanState::Scanning {
        let deadline = session.radio().deadline();

        tokio::select! {
            biased;

            _ = &mut shutdown => session.cancel()?,
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                session.on_timeout()?;
            }
            report = reports.recv(), if reports_open => match report {
                Some(report) if session.radio().is_receiving() => {
                    session.on_report(&report.as_report())?;
                }
                Some(_) => {}
                None => {
                    warn!("radio stopped delivering reports before the scan window ended");
                    reports_open = false;
                }
            },
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::DeviceAddress;
    use crate::test_utils::{FLAGS_ONLY, TEST_ADDRESS, address_for, named_payload};
    use std::sync::Mutex;

    #[derive(Debug)]
    struct FakeScanner {
        reports: Mutex<Vec<OwnedReport>>,
        /// Keeps the channel open after the queued reports are delivered.
        hold_open: Mutex<Option<mpsc::Sender<OwnedReport>>>,
        keep_open: bool,
        fail: bool,
    }

    impl FakeScanner {
        fn new(reports: Vec<OwnedReport>) -> Self {
            Self {
                reports: Mutex::new(reports),
                hold_open: Mutex::new(None),
                keep_open: false,
                fail: false,
            }
        }

        fn keep_open(mut self) -> Self {
            self.keep_open = true;
            self
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(vec![])
            }
        }
    }

    impl Scanner for FakeScanner {
        fn start_scan(
            &self,
            _backend: Backend,
        ) -> Pin<
            Box<dyn Future<Output = Result<mpsc::Receiver<OwnedReport>, ScanError>> + Send + '_>,
        > {
            let reports = self.reports.lock().unwrap().clone();
            Box::pin(async move {
                if self.fail {
                    return Err(ScanError::Bluetooth("no adapter".to_string()));
                }
                let (tx, rx) = mpsc::channel::<OwnedReport>(reports.len().max(1));
                for report in reports {
                    tx.try_send(report).unwrap();
                }
                if self.keep_open {
                    *self.hold_open.lock().unwrap() = Some(tx);
                }
                Ok(rx)
            })
        }
    }

    fn options() -> Options {
        Options::try_parse_from(["ble-nearby-scan"]).unwrap()
    }

    fn named(address: DeviceAddress, name: &str, rssi: i8) -> OwnedReport {
        OwnedReport::new(address, rssi, &named_payload(name))
    }

    async fn run(scanner: &FakeScanner, options: Options) -> String {
        let mut out = Vec::<u8>::new();
        run_with_io(options, scanner, &mut out, std::future::pending())
            .await
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn options_defaults() {
        let options = options();
        assert_eq!(options.backend, Backend::default());
        assert_eq!(options.duration, Duration::from_secs(30));
        assert!(!options.verbose);
    }

    #[cfg(feature = "hci")]
    #[test]
    fn options_parse_backend_alias_and_duration() {
        let options =
            Options::try_parse_from(["ble-nearby-scan", "--backend", "raw", "--duration", "1m", "-v"])
                .unwrap();
        assert_eq!(options.backend, Backend::Hci);
        assert_eq!(options.duration, Duration::from_secs(60));
        assert!(options.verbose);
    }

    #[test]
    fn options_reject_bad_duration() {
        assert!(Options::try_parse_from(["ble-nearby-scan", "--duration", "soon"]).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn run_reports_each_device_once_then_completes() {
        let scanner = FakeScanner::new(vec![
            named(TEST_ADDRESS, "ABC", -60),
            named(TEST_ADDRESS, "ABC", -61),
            OwnedReport::new(address_for(1), -70, &FLAGS_ONLY),
            named(address_for(1), "tag", -71),
        ]);

        let started = Instant::now();
        let out = run(&scanner, options()).await;

        assert_eq!(
            out,
            "Start scanning for nearby devices for 30 seconds\r\n\
             11:22:33:44:55:66 ABC -60\r\n\
             AA:BB:CC:00:00:01 tag -71\r\n\
             Scan completed\r\n"
        );
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn run_completes_while_stream_stays_open() {
        let scanner = FakeScanner::new(vec![named(TEST_ADDRESS, "ABC", -60)]).keep_open();
        let mut options = options();
        options.duration = Duration::from_secs(5);

        let started = Instant::now();
        let out = run(&scanner, options).await;

        assert!(out.starts_with("Start scanning for nearby devices for 5 seconds\r\n"));
        assert!(out.ends_with("Scan completed\r\n"));
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn run_with_no_reports_still_completes() {
        let scanner = FakeScanner::new(vec![]);
        let out = run(&scanner, options()).await;
        assert_eq!(
            out,
            "Start scanning for nearby devices for 30 seconds\r\nScan completed\r\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_cancels_on_shutdown() {
        let scanner = FakeScanner::new(vec![named(TEST_ADDRESS, "ABC", -60)]).keep_open();
        let mut out = Vec::<u8>::new();

        let started = Instant::now();
        run_with_io(options(), &scanner, &mut out, async {})
            .await
            .unwrap();

        let out = String::from_utf8(out).unwrap();
        assert_eq!(
            out,
            "Start scanning for nearby devices for 30 seconds\r\nScan cancelled\r\n"
        );
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test]
    async fn run_propagates_scanner_errors() {
        let scanner = FakeScanner::failing();
        let mut out = Vec::<u8>::new();

        let result = run_with_io(options(), &scanner, &mut out, std::future::pending()).await;

        assert!(matches!(result, Err(RunError::Scan(ScanError::Bluetooth(_)))));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn channel_radio_tracks_commands() {
        let mut radio = ChannelRadio::default();
        assert!(!radio.is_receiving());
        assert!(radio.deadline().is_none());

        radio.begin_receiving_reports();
        radio.arm_timeout(Duration::from_secs(30));
        assert!(radio.is_receiving());
        assert!(radio.deadline().is_some());

        radio.stop_receiving_reports();
        radio.disarm_timeout();
        assert!(!radio.is_receiving());
        assert!(radio.deadline().is_none());
    }
}
