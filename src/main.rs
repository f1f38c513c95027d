use ble_nearby_scan::app::{Options, RealScanner, run_with_io};
use ble_nearby_scan::logging::init_logger;
use clap::Parser;
use std::panic::{self, PanicHookInfo};
use tracing::warn;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Resolve on Ctrl-C. If the signal handler cannot be installed, never resolve.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    if let Err(e) = init_logger(options.verbose) {
        eprintln!("warning: logging disabled: {}", e);
    }

    let mut stdout = std::io::stdout().lock();
    match run_with_io(options, &RealScanner, &mut stdout, shutdown_signal()).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
