//! Output formatters for the continuous weight stream.
//!
//! The kiosk consumes one line per sample on stdout. The default `line`
//! format is the plain-text `WEIGHT:` protocol; `json` emits one object per
//! sample for consumers that already parse the command responses as JSON.

pub mod json;
pub mod line;

use crate::reading::Reading;

/// Trait for formatting readings into output lines.
pub trait OutputFormatter: Send + Sync {
    /// Format a reading as a single line, without the trailing newline.
    fn format(&self, reading: &Reading) -> String;
}

/// Available stream formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// `WEIGHT:<grams> (Raw: <count>)`
    #[default]
    Line,
    /// `{"weight":<grams>,"raw":<count>}`
    Json,
}

impl OutputFormat {
    pub fn formatter(self) -> Box<dyn OutputFormatter> {
        match self {
            OutputFormat::Line => Box::new(line::LineFormatter),
            OutputFormat::Json => Box::new(json::JsonFormatter),
        }
    }
}
