//! `scale-bridge` library.
//!
//! The binary (`src/main.rs`) is responsible for logging setup and process exit
//! codes. The acquisition loop lives in [`crate::monitor`] and the one-shot
//! operations in [`crate::app`], where both can be tested deterministically
//! with an injected connector and injected output streams.

pub mod app;
pub mod auto_tare;
pub mod calibration;
pub mod command;
pub mod duration;
pub mod filter;
pub mod link;
pub mod monitor;
pub mod output;
pub mod reading;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types at the crate root
pub use auto_tare::AutoTareMonitor;
pub use calibration::{CalibrationField, CalibrationRecord, CalibrationStore, StoreError};
pub use command::{Command, CommandChannel, CommandResponse};
pub use duration::parse_duration;
pub use filter::SampleFilter;
pub use link::{Connector, LinkError, RawReading, SerialLink, SerialPortConnector};
pub use monitor::{LinkState, MonitorLoop, MonitorSettings};
pub use output::{OutputFormat, OutputFormatter};
pub use reading::Reading;
