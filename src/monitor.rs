//! Continuous acquisition loop.
//!
//! One cooperative loop owns the serial link and interleaves two bounded
//! waits: a zero-wait check of the command channel and a timed serial read.
//! The loop never gives up on the device. Connection faults back off and
//! retry, garbled samples are dropped, and command failures are answered on
//! the command's own response line.

use crate::auto_tare::AutoTareMonitor;
use crate::calibration::{CalibrationField, CalibrationRecord, CalibrationStore};
use crate::command::{self, CommandChannel, CommandContext};
use crate::filter::SampleFilter;
use crate::link::{self, Connector, RawReading, SETTLE_DELAY, SerialLink, request_raw};
use crate::output::OutputFormatter;
use crate::reading::Reading;
use std::io::{self, Write};
use std::time::Duration;

/// Wait between failed connection attempts.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(2);

/// Pause between routine polls while streaming.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on one serial read.
pub const READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Timing knobs for [`MonitorLoop`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    pub read_timeout: Duration,
    pub poll_interval: Duration,
    pub settle: Duration,
    pub backoff: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings {
            read_timeout: READ_TIMEOUT,
            poll_interval: POLL_INTERVAL,
            settle: SETTLE_DELAY,
            backoff: RECONNECT_BACKOFF,
        }
    }
}

/// Connection state of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Streaming,
}

/// Acquisition loop for one scale.
pub struct MonitorLoop {
    connector: Box<dyn Connector>,
    port: String,
    store: CalibrationStore,
    settings: MonitorSettings,
    formatter: Box<dyn OutputFormatter>,
    state: LinkState,
    link: Option<Box<dyn SerialLink>>,
    /// Calibration used for every emitted weight
    calibration: CalibrationRecord,
    filter: SampleFilter,
    auto_tare: AutoTareMonitor,
}

fn write_line(out: &mut dyn Write, line: &str) -> io::Result<()> {
    writeln!(out, "{line}")?;
    out.flush()
}

impl MonitorLoop {
    pub fn new(
        connector: Box<dyn Connector>,
        port: impl Into<String>,
        store: CalibrationStore,
        settings: MonitorSettings,
        formatter: Box<dyn OutputFormatter>,
    ) -> Self {
        MonitorLoop {
            connector,
            port: port.into(),
            store,
            settings,
            formatter,
            state: LinkState::Disconnected,
            link: None,
            calibration: CalibrationRecord::default(),
            filter: SampleFilter::new(),
            auto_tare: AutoTareMonitor::default(),
        }
    }

    /// Replace the auto-tare policy.
    pub fn with_auto_tare(mut self, auto_tare: AutoTareMonitor) -> Self {
        self.auto_tare = auto_tare;
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn calibration(&self) -> CalibrationRecord {
        self.calibration
    }

    /// Run until writing to `out` fails.
    ///
    /// Device and command faults never end the loop; a broken `out` means the
    /// consumer is gone.
    pub async fn run(
        &mut self,
        commands: &mut CommandChannel,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        log::info!("Scale monitor starting on {}", self.port);
        loop {
            self.step(commands, out).await?;
        }
    }

    /// Perform one state transition or one streaming iteration.
    ///
    /// * `Disconnected` moves to `Connecting` without waiting.
    /// * `Connecting` opens the link, or rejects pending commands and sleeps
    ///   the backoff when the port cannot be opened.
    /// * `Streaming` resolves at most one pending command, or polls the scale
    ///   once and sleeps the poll interval.
    ///
    /// # Arguments
    ///
    /// * `commands` - Pending tare and calibrate requests
    /// * `out` - Receives weight lines and command responses
    ///
    /// # Errors
    ///
    /// Returns an error only if writing to `out` fails. Link faults are
    /// handled by moving back to `Disconnected`.
    pub async fn step(
        &mut self,
        commands: &mut CommandChannel,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        match self.state {
            LinkState::Disconnected => {
                self.state = LinkState::Connecting;
                Ok(())
            }
            LinkState::Connecting => self.connect(commands, out).await,
            LinkState::Streaming => self.stream(commands, out).await,
        }
    }

    async fn connect(
        &mut self,
        commands: &mut CommandChannel,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        match link::connect(self.connector.as_ref(), &self.port, self.settings.settle).await {
            Ok(link) => {
                self.link = Some(link);
                self.calibration = self.store.get(&self.port);
                self.filter.clear();
                self.auto_tare.reset();
                self.state = LinkState::Streaming;
                log::info!(
                    "Streaming from {} (tare offset {}, factor {})",
                    self.port,
                    self.calibration.tare_offset,
                    self.calibration.calibration_factor
                );
                Ok(())
            }
            Err(error) => {
                log::warn!("{error}; retrying in {:?}", self.settings.backoff);
                self.state = LinkState::Disconnected;
                self.reject_pending(commands, out)?;
                tokio::time::sleep(self.settings.backoff).await;
                Ok(())
            }
        }
    }

    async fn stream(
        &mut self,
        commands: &mut CommandChannel,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        let Some(link) = self.link.as_mut() else {
            self.state = LinkState::Disconnected;
            return Ok(());
        };

        if let Some(command) = commands.try_next() {
            let request = command.clone();
            let result = command::resolve(
                command,
                CommandContext {
                    link: link.as_mut(),
                    store: &self.store,
                    device_id: &self.port,
                    read_timeout: self.settings.read_timeout,
                },
            );

            match result {
                Ok(response) => {
                    if response.success {
                        self.calibration = self.store.get(&self.port);
                    }
                    write_line(out, &response.to_json())?;
                }
                Err(error) => {
                    let response = request.reject(format!("Serial I/O error: {error}"));
                    write_line(out, &response.to_json())?;
                    self.fault(error);
                }
            }
            return Ok(());
        }

        match request_raw(link.as_mut(), self.settings.read_timeout) {
            Ok(RawReading::Sample(raw)) => self.emit(raw, out)?,
            Ok(RawReading::NoResponse) => {}
            Ok(RawReading::Garbled(line)) => log::trace!("Discarding unparseable line {line:?}"),
            Err(error) => {
                self.fault(error);
                return Ok(());
            }
        }

        tokio::time::sleep(self.settings.poll_interval).await;
        Ok(())
    }

    fn emit(&mut self, raw: i64, out: &mut dyn Write) -> io::Result<()> {
        self.filter.push(raw);
        let Some(filtered) = self.filter.produce() else {
            return Ok(());
        };

        // One integer count backs both the printed raw value and the weight
        let raw = filtered.round() as i64;
        let reading = Reading {
            weight: self.calibration.grams(raw as f64),
            raw,
        };
        let now = tokio::time::Instant::now().into_std();
        let fire = self.auto_tare.observe(reading.weight, now);

        write_line(out, &self.formatter.format(&reading))?;

        if fire {
            self.auto_tare_at(reading.raw);
        }
        Ok(())
    }

    fn auto_tare_at(&mut self, raw: i64) {
        match self.store.set(&self.port, CalibrationField::TareOffset(raw)) {
            Ok(record) => {
                log::info!(
                    "Auto-tare on {}: weight rested near zero, tare offset {} -> {raw}",
                    self.port,
                    self.calibration.tare_offset
                );
                self.calibration = record;
            }
            Err(error) => log::error!("Auto-tare on {} not persisted: {error}", self.port),
        }
    }

    fn fault(&mut self, error: io::Error) {
        log::warn!("Lost connection to {}: {error}", self.port);
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.state = LinkState::Disconnected;
    }

    fn reject_pending(
        &mut self,
        commands: &mut CommandChannel,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        while let Some(command) = commands.try_next() {
            write_line(out, &command.reject("Scale not connected").to_json())?;
        }
        Ok(())
    }
}
