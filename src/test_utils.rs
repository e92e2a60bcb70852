use crate::calibration::CalibrationStore;
use crate::link::{Connector, LinkError, SerialLink};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Device identity used by unit tests.
pub const TEST_PORT: &str = "/dev/ttyTEST0";

/// One scripted answer from the fake device.
#[derive(Debug, Clone)]
pub enum FakeReply {
    Line(String),
    /// The read times out
    Silence,
    /// The read fails with an I/O error
    Fault,
}

impl FakeReply {
    pub fn line(text: &str) -> Self {
        FakeReply::Line(text.to_string())
    }
}

#[derive(Debug, Default)]
struct FakeDevice {
    replies: VecDeque<FakeReply>,
    written: Vec<u8>,
    opens: usize,
    failing_opens: usize,
    discards: usize,
    ports: Vec<String>,
}

/// In-memory device shared between a connector and every link it opens.
///
/// Reads consume scripted replies in order; once the script runs out every
/// read times out.
#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    device: Arc<Mutex<FakeDevice>>,
}

impl FakeConnector {
    pub fn new(replies: impl IntoIterator<Item = FakeReply>) -> Self {
        let connector = FakeConnector::default();
        connector.push_replies(replies);
        connector
    }

    pub fn push_replies(&self, replies: impl IntoIterator<Item = FakeReply>) {
        self.device.lock().unwrap().replies.extend(replies);
    }

    pub fn fail_next_opens(&self, count: usize) {
        self.device.lock().unwrap().failing_opens = count;
    }

    pub fn set_ports(&self, ports: &[&str]) {
        self.device.lock().unwrap().ports = ports.iter().map(|p| p.to_string()).collect();
    }

    pub fn written(&self) -> Vec<u8> {
        self.device.lock().unwrap().written.clone()
    }

    pub fn opens(&self) -> usize {
        self.device.lock().unwrap().opens
    }

    pub fn discards(&self) -> usize {
        self.device.lock().unwrap().discards
    }

    pub fn remaining_replies(&self) -> usize {
        self.device.lock().unwrap().replies.len()
    }
}

impl Connector for FakeConnector {
    fn open(&self, port: &str) -> Result<Box<dyn SerialLink>, LinkError> {
        let mut device = self.device.lock().unwrap();
        if device.failing_opens > 0 {
            device.failing_opens -= 1;
            return Err(LinkError::Open {
                port: port.to_string(),
                reason: "No such file or directory".to_string(),
            });
        }
        device.opens += 1;
        Ok(Box::new(FakeLink {
            device: Arc::clone(&self.device),
            open: true,
        }))
    }

    fn list_ports(&self) -> Result<Vec<String>, LinkError> {
        Ok(self.device.lock().unwrap().ports.clone())
    }
}

struct FakeLink {
    device: Arc<Mutex<FakeDevice>>,
    open: bool,
}

impl FakeLink {
    fn ensure_open(&self) -> io::Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "closed"))
        }
    }
}

impl SerialLink for FakeLink {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.ensure_open()?;
        self.device.lock().unwrap().written.extend_from_slice(bytes);
        Ok(())
    }

    fn read_line(&mut self, _timeout: Duration) -> io::Result<Option<String>> {
        self.ensure_open()?;
        match self.device.lock().unwrap().replies.pop_front() {
            Some(FakeReply::Line(line)) => Ok(Some(line)),
            Some(FakeReply::Silence) | None => Ok(None),
            Some(FakeReply::Fault) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "device unplugged",
            )),
        }
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.ensure_open()?;
        self.device.lock().unwrap().discards += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

/// A calibration store in a fresh temporary directory.
///
/// Keep the returned `TempDir` alive for as long as the store is used.
pub fn temp_store() -> (TempDir, CalibrationStore) {
    let dir = TempDir::new().unwrap();
    let store = CalibrationStore::new(dir.path().join("calibration.json"));
    (dir, store)
}
