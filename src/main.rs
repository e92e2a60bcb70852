use clap::Parser;
use env_logger::Env;
use scale_bridge::SerialPortConnector;
use scale_bridge::app::{Options, Outcome, run_with_io};
use std::panic::{self, PanicHookInfo};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Log to stderr; stdout carries the weight stream and JSON responses.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, the kiosk supervisor) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(options.verbose);

    let connector = SerialPortConnector::new(options.baud, options.read_timeout);
    let mut stdout = std::io::stdout();

    match run_with_io(options, Box::new(connector), &mut stdout).await {
        Ok(Outcome::Success) => std::process::exit(EXIT_SUCCESS),
        Ok(Outcome::Failure) => std::process::exit(EXIT_ERROR),
        Err(why) => {
            log::error!("{why}");
            std::process::exit(EXIT_ERROR);
        }
    }
}
