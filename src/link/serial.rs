//! `serialport`-backed link.

use super::{Connector, LinkError, SerialLink};
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 64;

/// Opens real serial ports at a fixed line speed.
#[derive(Debug, Clone)]
pub struct SerialPortConnector {
    baud_rate: u32,
    timeout: Duration,
}

impl SerialPortConnector {
    pub fn new(baud_rate: u32, timeout: Duration) -> Self {
        SerialPortConnector { baud_rate, timeout }
    }
}

impl Connector for SerialPortConnector {
    fn open(&self, port: &str) -> Result<Box<dyn SerialLink>, LinkError> {
        let handle = serialport::new(port, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| LinkError::Open {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        log::debug!("Opened {port} at {} baud", self.baud_rate);
        Ok(Box::new(SerialPortLink::new(handle)))
    }

    fn list_ports(&self) -> Result<Vec<String>, LinkError> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .map_err(|e| LinkError::Enumerate(e.to_string()))
    }
}

/// Bytes received from the device, split into trimmed lines.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Remove and return the oldest complete line, if any.
    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(String::from_utf8_lossy(&line).trim().to_string())
    }

    fn clear(&mut self) {
        self.pending.clear();
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// A serial port plus the bytes received after the last complete line.
pub struct SerialPortLink {
    port: Option<Box<dyn SerialPort>>,
    lines: LineBuffer,
}

impl SerialPortLink {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        SerialPortLink {
            port: Some(port),
            lines: LineBuffer::default(),
        }
    }

    fn port(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "serial link is closed"))
    }
}

impl SerialLink for SerialPortLink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()
    }

    fn read_line(&mut self, timeout: Duration) -> io::Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];

        loop {
            if let Some(line) = self.lines.take_line() {
                return Ok(Some(line));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            let port = self.port()?;
            port.set_timeout(remaining)?;
            match port.read(&mut chunk) {
                Ok(n) => self.lines.extend(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.lines.clear();
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::debug!("Closed serial link");
        }
    }
}

impl Drop for SerialPortLink {
    fn drop(&mut self) {
        self.close();
    }
}
