//! Plain-text `WEIGHT:` line formatter.

use crate::output::OutputFormatter;
use crate::reading::Reading;

/// Prefix the kiosk looks for on each stream line.
pub const WEIGHT_PREFIX: &str = "WEIGHT:";

#[derive(Debug, Default, Clone, Copy)]
pub struct LineFormatter;

impl OutputFormatter for LineFormatter {
    fn format(&self, reading: &Reading) -> String {
        format!("{WEIGHT_PREFIX}{:.2} (Raw: {})", reading.weight, reading.raw)
    }
}
