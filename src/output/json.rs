//! JSON-per-line formatter.

use crate::output::OutputFormatter;
use crate::reading::Reading;

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn format(&self, reading: &Reading) -> String {
        // Two plain numbers always serialize
        serde_json::to_string(reading).unwrap_or_default()
    }
}
