//! Command-line operations for `scale-bridge`.
//!
//! This module is decoupled from process setup (logging, exit codes) so every
//! operation can be exercised against an in-memory connector and an injected
//! output stream.

use crate::calibration::CalibrationStore;
use crate::command::{self, Command, CommandChannel, CommandContext};
use crate::duration::parse_duration;
use crate::link::{
    self, Connector, DEFAULT_BAUD_RATE, LinkError, RawReading, SerialLink, probe_firmware,
    request_raw,
};
use crate::monitor::{MonitorLoop, MonitorSettings};
use crate::output::OutputFormat;
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Value, json};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line configuration.
#[derive(Parser, Debug, Clone)]
#[command(author, about, version)]
pub struct Options {
    #[command(subcommand)]
    pub operation: Operation,

    /// Serial port of the scale, e.g. /dev/ttyUSB0
    #[arg(long, global = true, env = "SCALE_PORT")]
    pub port: Option<String>,

    /// Serial line speed
    #[arg(long, global = true, default_value_t = DEFAULT_BAUD_RATE)]
    pub baud: u32,

    /// JSON file holding tare and calibration for every scale on this host
    #[arg(
        long,
        global = true,
        env = "SCALE_CALIBRATION_FILE",
        default_value = "scale_calibration.json"
    )]
    pub calibration_file: PathBuf,

    /// How long to wait for the scale to answer one request.
    /// Accepts duration with suffix: 500ms, 1s. Without suffix, seconds.
    #[arg(long, global = true, value_parser = parse_duration, default_value = "1s")]
    pub read_timeout: Duration,

    /// Boot time of the microcontroller after the port is opened
    #[arg(long, global = true, value_parser = parse_duration, default_value = "2s")]
    pub settle: Duration,

    /// Verbose output, log debug messages to stderr
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Operation {
    /// List serial ports answering with scale firmware
    Discover,
    /// Print one weight reading
    Read,
    /// Check whether the port can be opened
    Status,
    /// Zero the scale at its current load
    Tare,
    /// Calibrate with a known weight on the scale
    Calibrate {
        /// Known weight in grams
        #[arg(long, allow_negative_numbers = true)]
        weight: f64,
    },
    /// Stream weights continuously and serve tare/calibrate requests from stdin
    Monitor {
        /// Pause between polls
        #[arg(long, value_parser = parse_duration, default_value = "50ms")]
        poll_interval: Duration,

        /// Wait before retrying a failed connection
        #[arg(long, value_parser = parse_duration, default_value = "2s")]
        backoff: Duration,

        /// Format of the weight stream
        #[arg(long, default_value_t, value_enum)]
        format: OutputFormat,
    },
}

/// Errors from one-shot operations.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("No port specified")]
    MissingPort,
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("{message}")]
    Device {
        message: String,
        raw: Option<String>,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl RunError {
    /// Structured form printed by one-shot operations.
    pub fn to_json(&self) -> Value {
        match self {
            RunError::Device {
                message,
                raw: Some(raw),
            } => json!({ "error": message, "raw": raw }),
            other => json!({ "error": other.to_string() }),
        }
    }
}

/// Whether a one-shot operation achieved what was asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// A scale found by [`Operation::Discover`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredDevice {
    pub identifier: String,
    pub model: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub connected: bool,
}

impl DiscoveredDevice {
    fn scale(identifier: String) -> Self {
        DiscoveredDevice {
            identifier,
            model: "Arduino Scale".to_string(),
            kind: "SCALE".to_string(),
            connected: true,
        }
    }
}

/// Operations that open the port, print one JSON value and exit.
#[derive(Debug, Clone, PartialEq)]
enum OneShot {
    Discover,
    Read,
    Status,
    Resolve(Command),
}

/// Run the selected operation, writing protocol output to `out`.
///
/// # Arguments
///
/// * `options` - Parsed command-line options, including the operation
/// * `connector` - Opens the scale's serial port
/// * `out` - Destination of the weight stream and of one-shot JSON output
///
/// # Returns
///
/// `Outcome::Failure` when a one-shot operation printed an error or a failed
/// command response. The monitor never returns `Ok` on its own.
///
/// # Errors
///
/// Only when `out` itself fails or the monitor is started without a port.
/// Device and link errors of one-shot operations are printed, not returned.
pub async fn run_with_io(
    options: Options,
    connector: Box<dyn Connector>,
    out: &mut dyn Write,
) -> Result<Outcome, RunError> {
    let task = match options.operation {
        Operation::Monitor {
            poll_interval,
            backoff,
            format,
        } => {
            let settings = MonitorSettings {
                read_timeout: options.read_timeout,
                poll_interval,
                settle: options.settle,
                backoff,
            };
            return monitor(&options, connector, settings, format, out).await;
        }
        Operation::Discover => OneShot::Discover,
        Operation::Read => OneShot::Read,
        Operation::Status => OneShot::Status,
        Operation::Tare => OneShot::Resolve(Command::Tare { request_id: None }),
        Operation::Calibrate { weight } => OneShot::Resolve(Command::Calibrate {
            request_id: None,
            weight: Some(weight),
        }),
    };

    let (value, outcome) = match one_shot(task, &options, connector.as_ref()).await {
        Ok(report) => report,
        Err(error) => {
            log::debug!("{:?} failed: {error}", options.operation);
            (error.to_json(), Outcome::Failure)
        }
    };
    writeln!(out, "{value}")?;
    out.flush()?;
    Ok(outcome)
}

async fn monitor(
    options: &Options,
    connector: Box<dyn Connector>,
    settings: MonitorSettings,
    format: OutputFormat,
    out: &mut dyn Write,
) -> Result<Outcome, RunError> {
    let port = options.port.clone().ok_or(RunError::MissingPort)?;
    let mut monitor = MonitorLoop::new(
        connector,
        port,
        CalibrationStore::new(&options.calibration_file),
        settings,
        format.formatter(),
    );
    let mut commands = CommandChannel::stdin();
    monitor.run(&mut commands, out).await?;
    Ok(Outcome::Success)
}

async fn one_shot(
    task: OneShot,
    options: &Options,
    connector: &dyn Connector,
) -> Result<(Value, Outcome), RunError> {
    let port = || options.port.as_deref().ok_or(RunError::MissingPort);
    let store = CalibrationStore::new(&options.calibration_file);

    let command = match task {
        OneShot::Discover => {
            let devices = discover(connector, options).await?;
            return Ok((json!(devices), Outcome::Success));
        }
        OneShot::Status => return Ok((status(connector, port()?), Outcome::Success)),
        OneShot::Read => {
            let port = port()?;
            let mut link = link::connect(connector, port, options.settle).await?;
            let result = read_weight(link.as_mut(), &store, port, options.read_timeout);
            link.close();
            return Ok((result?, Outcome::Success));
        }
        OneShot::Resolve(command) => command,
    };

    let port = port()?;
    let mut link = link::connect(connector, port, options.settle).await?;
    let result = command::resolve(
        command,
        CommandContext {
            link: link.as_mut(),
            store: &store,
            device_id: port,
            read_timeout: options.read_timeout,
        },
    );
    link.close();

    let response = result.map_err(LinkError::from)?;
    let outcome = if response.success {
        Outcome::Success
    } else {
        Outcome::Failure
    };
    Ok((json!(response), outcome))
}

/// Probe every serial port for scale firmware.
///
/// Ports that cannot be opened (busy, no permission) are skipped.
pub async fn discover(
    connector: &dyn Connector,
    options: &Options,
) -> Result<Vec<DiscoveredDevice>, RunError> {
    let mut devices = Vec::new();

    for port in connector.list_ports()? {
        let mut link = match link::connect(connector, &port, options.settle).await {
            Ok(link) => link,
            Err(error) => {
                log::debug!("Skipping {port}: {error}");
                continue;
            }
        };

        let found = probe_firmware(link.as_mut(), options.read_timeout);
        link.close();

        match found {
            Ok(true) => {
                log::info!("Found scale on {port}");
                devices.push(DiscoveredDevice::scale(port));
            }
            Ok(false) => log::debug!("{port} is not a scale"),
            Err(error) => log::debug!("Probe of {port} failed: {error}"),
        }
    }

    Ok(devices)
}

fn status(connector: &dyn Connector, port: &str) -> Value {
    let status = match connector.open(port) {
        Ok(mut link) => {
            link.close();
            "ONLINE"
        }
        Err(error) => {
            log::debug!("{error}");
            "OFFLINE"
        }
    };
    json!({ "status": status, "port": port })
}

fn read_weight(
    link: &mut dyn SerialLink,
    store: &CalibrationStore,
    port: &str,
    timeout: Duration,
) -> Result<Value, RunError> {
    match request_raw(link, timeout).map_err(LinkError::from)? {
        RawReading::Sample(raw) => {
            let weight = store.get(port).grams(raw as f64);
            Ok(json!({ "weight": weight, "raw": raw, "unit": "g" }))
        }
        RawReading::NoResponse => Err(RunError::Device {
            message: "No response from scale".to_string(),
            raw: None,
        }),
        RawReading::Garbled(line) => Err(RunError::Device {
            message: "Invalid response".to_string(),
            raw: Some(line),
        }),
    }
}
