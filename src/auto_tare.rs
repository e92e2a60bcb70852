//! Automatic re-zeroing after the scale has rested near zero.
//!
//! Load cells drift slowly with temperature. When the platform has shown a
//! weight within [`ZERO_BAND_GRAMS`] of zero for [`DWELL`], the current
//! reading is treated as the new zero. Any excursion out of the band restarts
//! the dwell, so an item placed and removed quickly never re-zeroes the scale.

use std::time::{Duration, Instant};

/// Half-width of the band around zero, in grams.
pub const ZERO_BAND_GRAMS: f64 = 0.4;

/// How long the weight has to stay inside the band before auto-tare fires.
pub const DWELL: Duration = Duration::from_secs(30);

/// Tracks how long the weight has been resting inside the zero band.
#[derive(Debug)]
pub struct AutoTareMonitor {
    band: f64,
    dwell: Duration,
    /// When the weight most recently entered the band
    stable_since: Option<Instant>,
}

impl Default for AutoTareMonitor {
    fn default() -> Self {
        Self::new(ZERO_BAND_GRAMS, DWELL)
    }
}

impl AutoTareMonitor {
    pub fn new(band: f64, dwell: Duration) -> Self {
        AutoTareMonitor {
            band,
            dwell,
            stable_since: None,
        }
    }

    /// Feed one weight observed at `now`.
    ///
    /// Returns `true` when auto-tare should fire. Firing clears the dwell, so
    /// the next one needs another full dwell inside the band.
    pub fn observe(&mut self, weight: f64, now: Instant) -> bool {
        if weight.abs() > self.band {
            self.stable_since = None;
            return false;
        }

        match self.stable_since {
            None => {
                self.stable_since = Some(now);
                false
            }
            Some(since) if now.saturating_duration_since(since) >= self.dwell => {
                self.stable_since = None;
                true
            }
            Some(_) => false,
        }
    }

    /// Instant the current dwell started, if the weight is inside the band.
    pub fn stable_since(&self) -> Option<Instant> {
        self.stable_since
    }

    pub fn reset(&mut self) {
        self.stable_since = None;
    }
}
