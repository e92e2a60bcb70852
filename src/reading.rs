//! Weight reading data structure.

use serde::Serialize;

/// One calibrated sample from the continuous stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reading {
    /// Weight in grams, rounded to 2 decimals
    pub weight: f64,
    /// Filtered raw count the weight was computed from
    pub raw: i64,
}
