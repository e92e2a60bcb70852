//! Sliding-window median over raw load-cell samples.
//!
//! Load cells read through a cheap ADC jitter by a few counts between reads.
//! A median over the last three samples removes single-sample spikes while
//! adding at most one poll interval of latency to the continuous stream.

use std::collections::VecDeque;

/// Number of raw samples kept in the window.
pub const FILTER_WINDOW: usize = 3;

/// Fixed-length FIFO of raw samples that produces their median.
#[derive(Debug, Default, Clone)]
pub struct SampleFilter {
    window: VecDeque<i64>,
}

impl SampleFilter {
    pub fn new() -> Self {
        SampleFilter {
            window: VecDeque::with_capacity(FILTER_WINDOW),
        }
    }

    /// Insert a raw sample, evicting the oldest one once the window is full.
    pub fn push(&mut self, raw: i64) {
        if self.window.len() == FILTER_WINDOW {
            self.window.pop_front();
        }
        self.window.push_back(raw);
    }

    /// Median of the samples currently in the window.
    ///
    /// During warm-up the median is taken over fewer samples; with two
    /// samples it is the mean of both. Returns `None` when the window is empty.
    pub fn produce(&self) -> Option<f64> {
        let mut sorted: Vec<i64> = self.window.iter().copied().collect();
        sorted.sort_unstable();

        let len = sorted.len();
        match len {
            0 => None,
            _ if len % 2 == 1 => Some(sorted[len / 2] as f64),
            _ => Some((sorted[len / 2 - 1] as f64 + sorted[len / 2] as f64) / 2.0),
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}
