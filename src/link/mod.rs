//! Serial link abstraction for the scale microcontroller.
//!
//! The device speaks a one-character ASCII protocol: the host writes a single
//! command byte and the firmware answers with one newline-terminated line.
//! This module provides trait-based access to that link so the acquisition
//! loop can run against in-memory fakes as well as real serial ports.

pub mod serial;

use std::io;
use std::time::Duration;
use thiserror::Error;

pub use serial::SerialPortConnector;

/// Default line speed of the scale firmware.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Opening the port resets the microcontroller; it needs this long to boot.
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Ask the firmware to identify itself.
pub const CMD_VERSION: &[u8] = b"V";

/// Ask the firmware for one raw ADC count.
pub const CMD_READ: &[u8] = b"R";

/// Substring of the version response that marks compatible firmware.
pub const FIRMWARE_MARKER: &str = "SCALE";

/// Errors establishing or using a link.
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed to open {port}: {reason}")]
    Open { port: String, reason: String },
    #[error("Failed to enumerate serial ports: {0}")]
    Enumerate(String),
    #[error("Serial I/O error: {0}")]
    Io(#[from] io::Error),
}

/// An open, line-oriented connection to one device.
pub trait SerialLink: Send {
    /// Send one protocol command, without extra framing.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Wait up to `timeout` for one line.
    ///
    /// `Ok(None)` means nothing arrived in time, which is normal. Returned
    /// lines have surrounding whitespace removed.
    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>>;

    /// Drop anything received but not yet read.
    fn discard_input(&mut self) -> io::Result<()>;

    /// Close the link. Calling this more than once is harmless.
    fn close(&mut self);
}

/// Opens links by port name.
pub trait Connector: Send + Sync {
    fn open(&self, port: &str) -> Result<Box<dyn SerialLink>, LinkError>;

    /// Names of serial ports present on this host.
    fn list_ports(&self) -> Result<Vec<String>, LinkError>;
}

/// Open `port`, wait for the device to boot and flush its startup chatter.
///
/// # Arguments
///
/// * `connector` - Opens the port
/// * `port` - Port name, also the device identity in the calibration store
/// * `settle` - Boot time of the microcontroller; zero skips the wait
///
/// # Errors
///
/// `LinkError::Open` if the port cannot be opened, `LinkError::Io` if the
/// input flush fails. The link is closed in the latter case.
pub async fn connect(
    connector: &dyn Connector,
    port: &str,
    settle: Duration,
) -> Result<Box<dyn SerialLink>, LinkError> {
    let mut link = connector.open(port)?;
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }
    if let Err(error) = link.discard_input() {
        link.close();
        return Err(error.into());
    }
    Ok(link)
}

/// Result of asking the device for one raw sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawReading {
    Sample(i64),
    /// Nothing arrived before the timeout
    NoResponse,
    /// A line arrived but was not an integer
    Garbled(String),
}

/// Request one raw count from the device.
///
/// Stale input is discarded first so the answer belongs to this request.
pub fn request_raw(link: &mut dyn SerialLink, timeout: Duration) -> io::Result<RawReading> {
    link.discard_input()?;
    link.write(CMD_READ)?;

    Ok(match link.read_line(timeout)? {
        None => RawReading::NoResponse,
        Some(line) if line.is_empty() => RawReading::NoResponse,
        Some(line) => match line.parse::<i64>() {
            Ok(raw) => RawReading::Sample(raw),
            Err(_) => RawReading::Garbled(line),
        },
    })
}

/// Ask the device to identify itself and check for compatible firmware.
pub fn probe_firmware(link: &mut dyn SerialLink, timeout: Duration) -> io::Result<bool> {
    link.discard_input()?;
    link.write(CMD_VERSION)?;

    Ok(link
        .read_line(timeout)?
        .is_some_and(|line| line.contains(FIRMWARE_MARKER)))
}
