//! Out-of-band tare and calibration requests.
//!
//! Requests arrive as line-delimited JSON on stdin while the monitor loop is
//! polling the scale. A background task parses the lines and forwards them
//! through a bounded channel; the loop checks that channel without waiting
//! once per cycle and answers each request with one correlated JSON line.

use crate::calibration::{CalibrationField, CalibrationStore};
use crate::link::{RawReading, SerialLink, request_raw};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Channel buffer size for pending commands.
pub const COMMAND_CHANNEL_BUFFER_SIZE: usize = 32;

/// A request from the kiosk application.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Command {
    /// Zero the scale at its current load
    Tare {
        #[serde(rename = "requestId", default)]
        request_id: Option<Value>,
    },
    /// Derive the calibration factor from a known weight on the platform
    Calibrate {
        #[serde(rename = "requestId", default)]
        request_id: Option<Value>,
        /// Known weight in grams. Anything that is not a JSON number reads
        /// as `None` so the request is still answered.
        #[serde(default, deserialize_with = "lenient_weight")]
        weight: Option<f64>,
    },
}

fn lenient_weight<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_f64))
}

/// Errors parsing a command line.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Blank command line")]
    Blank,
    #[error("Invalid command: {0}")]
    Json(#[from] serde_json::Error),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let line = line.trim();
        if line.is_empty() {
            return Err(CommandError::Blank);
        }
        Ok(serde_json::from_str(line)?)
    }

    pub fn request_id(&self) -> Option<&Value> {
        match self {
            Command::Tare { request_id } | Command::Calibrate { request_id, .. } => {
                request_id.as_ref()
            }
        }
    }

    pub fn response_kind(&self) -> ResponseKind {
        match self {
            Command::Tare { .. } => ResponseKind::TareComplete,
            Command::Calibrate { .. } => ResponseKind::CalibrationComplete,
        }
    }

    /// A failure response for this command that never touched the device.
    pub fn reject(&self, message: impl Into<String>) -> CommandResponse {
        CommandResponse::failure(self.response_kind(), self.request_id().cloned(), message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    TareComplete,
    CalibrationComplete,
}

/// Payload of a successful response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    Tare { value: i64 },
    Calibration { factor: f64 },
}

/// The answer to one [`Command`], echoing its `requestId`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    #[serde(rename = "requestId", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CommandResponse {
    pub fn success(kind: ResponseKind, request_id: Option<Value>, data: ResponseData) -> Self {
        CommandResponse {
            kind,
            request_id,
            success: true,
            data: Some(data),
            message: None,
        }
    }

    pub fn failure(
        kind: ResponseKind,
        request_id: Option<Value>,
        message: impl Into<String>,
    ) -> Self {
        CommandResponse {
            kind,
            request_id,
            success: false,
            data: None,
            message: Some(message.into()),
        }
    }

    pub fn to_json(&self) -> String {
        // Serializing this struct cannot fail: every field is a plain value
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Device and store the commands operate on.
pub struct CommandContext<'a> {
    pub link: &'a mut dyn SerialLink,
    pub store: &'a CalibrationStore,
    pub device_id: &'a str,
    pub read_timeout: Duration,
}

/// Resolve one command against the device and the calibration store.
///
/// Device silence, garbage and store failures come back as failure responses.
/// Only link I/O faults are returned as `Err`, so the caller can tear the link
/// down after answering the request.
pub fn resolve(command: Command, ctx: CommandContext<'_>) -> io::Result<CommandResponse> {
    match command {
        Command::Tare { request_id } => tare(request_id, ctx),
        Command::Calibrate { request_id, weight } => calibrate(request_id, weight, ctx),
    }
}

fn read_fresh(ctx: &mut CommandContext<'_>) -> io::Result<Result<i64, String>> {
    Ok(match request_raw(&mut *ctx.link, ctx.read_timeout)? {
        RawReading::Sample(raw) => Ok(raw),
        RawReading::NoResponse => Err("No response from scale".to_string()),
        RawReading::Garbled(line) => Err(format!("Invalid response from scale: {line}")),
    })
}

fn tare(request_id: Option<Value>, mut ctx: CommandContext<'_>) -> io::Result<CommandResponse> {
    let kind = ResponseKind::TareComplete;
    let raw = match read_fresh(&mut ctx)? {
        Ok(raw) => raw,
        Err(message) => return Ok(CommandResponse::failure(kind, request_id, message)),
    };

    Ok(
        match ctx
            .store
            .set(ctx.device_id, CalibrationField::TareOffset(raw))
        {
            Ok(_) => {
                log::info!("Tared {} at raw {raw}", ctx.device_id);
                CommandResponse::success(kind, request_id, ResponseData::Tare { value: raw })
            }
            Err(error) => {
                log::error!("Failed to persist tare for {}: {error}", ctx.device_id);
                CommandResponse::failure(kind, request_id, error.to_string())
            }
        },
    )
}

fn calibrate(
    request_id: Option<Value>,
    weight: Option<f64>,
    mut ctx: CommandContext<'_>,
) -> io::Result<CommandResponse> {
    let kind = ResponseKind::CalibrationComplete;
    let known = match weight {
        Some(w) if w.is_finite() && w > 0.0 => w,
        _ => {
            return Ok(CommandResponse::failure(
                kind,
                request_id,
                "Invalid weight: known weight must be a positive number of grams",
            ));
        }
    };

    let raw = match read_fresh(&mut ctx)? {
        Ok(raw) => raw,
        Err(message) => return Ok(CommandResponse::failure(kind, request_id, message)),
    };

    let tare_offset = ctx.store.get(ctx.device_id).tare_offset;
    // Both counts come from the device; subtracting as i64 can overflow
    let factor = (raw as f64 - tare_offset as f64) / known;
    if factor == 0.0 || !factor.is_finite() {
        return Ok(CommandResponse::failure(
            kind,
            request_id,
            "Calibration failed: reading equals the tare offset, is the weight on the scale?",
        ));
    }

    Ok(
        match ctx
            .store
            .set(ctx.device_id, CalibrationField::CalibrationFactor(factor))
        {
            Ok(_) => {
                log::info!(
                    "Calibrated {} with {known} g: raw {raw}, factor {factor}",
                    ctx.device_id
                );
                CommandResponse::success(kind, request_id, ResponseData::Calibration { factor })
            }
            Err(error) => {
                log::error!("Failed to persist calibration for {}: {error}", ctx.device_id);
                CommandResponse::failure(kind, request_id, error.to_string())
            }
        },
    )
}

/// Receiving end of the command side channel.
#[derive(Debug)]
pub struct CommandChannel {
    rx: mpsc::Receiver<Command>,
}

impl CommandChannel {
    pub fn new(rx: mpsc::Receiver<Command>) -> Self {
        CommandChannel { rx }
    }

    /// A channel fed directly by the returned sender.
    pub fn pair() -> (mpsc::Sender<Command>, Self) {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER_SIZE);
        (tx, Self::new(rx))
    }

    /// Spawn a task that parses JSON lines from `reader` into commands.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_reader<R>(reader: R) -> Self
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let (tx, channel) = Self::pair();
        tokio::spawn(forward_commands(reader, tx));
        channel
    }

    /// Commands read from the process's stdin.
    pub fn stdin() -> Self {
        Self::spawn_reader(BufReader::new(tokio::io::stdin()))
    }

    /// Next pending command, without waiting.
    pub fn try_next(&mut self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}

async fn forward_commands<R>(reader: R, tx: mpsc::Sender<Command>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match Command::parse(&line) {
                Ok(command) => {
                    if tx.send(command).await.is_err() {
                        break;
                    }
                }
                Err(CommandError::Blank) => {}
                Err(error) => log::warn!("Ignoring command line {line:?}: {error}"),
            },
            Ok(None) => {
                log::debug!("Command input closed");
                break;
            }
            Err(error) => {
                log::warn!("Failed to read command input: {error}");
                break;
            }
        }
    }
}
