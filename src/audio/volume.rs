//! Per-frame RMS volume with a bounded history for drop detection.

use super::frame::AudioFrame;
use std::collections::VecDeque;

/// Entries required before `detect_drop` will make a call.
const MIN_DROP_HISTORY: usize = 15;
/// Size of each of the two comparison windows.
const DROP_WINDOW: usize = 8;
/// Rolling window the emphasis-peak check compares against.
const PEAK_REFERENCE_WINDOW: usize = 20;
/// A recent frame this much louder than the rolling mean is vocal emphasis.
const EMPHASIS_PEAK_RATIO: f64 = 1.5;

/// Tracks recent frame volumes.
///
/// `detect_drop` compares the last 8 volumes against the 8 before them, but
/// refuses to report a drop while the recent window still holds an emphasis
/// peak, so a stressed syllable followed by a breath does not cut a sentence.
#[derive(Debug, Clone)]
pub struct VolumeTracker {
    history: VecDeque<f64>,
    capacity: usize,
    drop_threshold: f64,
}

impl VolumeTracker {
    pub fn new(capacity: usize, drop_threshold: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            drop_threshold,
        }
    }

    /// Compute the frame's RMS and record it.
    pub fn observe(&mut self, frame: &AudioFrame) -> f64 {
        let volume = frame.rms();
        self.push(volume);
        volume
    }

    pub(crate) fn push(&mut self, volume: f64) {
        self.history.push_back(volume);
        while self.history.len() > self.capacity {
            self.history.pop_front();
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn latest(&self) -> Option<f64> {
        self.history.back().copied()
    }

    /// True when the recent volume fell far enough below the preceding window.
    pub fn detect_drop(&self) -> bool {
        let len = self.history.len();
        if len < MIN_DROP_HISTORY {
            return false;
        }

        let recent_start = len - DROP_WINDOW;
        let previous_start = len.saturating_sub(2 * DROP_WINDOW);
        let recent = self.window(recent_start, len);
        let previous = self.window(previous_start, recent_start);
        let recent_mean = mean(&recent);
        let previous_mean = mean(&previous);

        let recent_max = recent.iter().copied().fold(f64::MIN, f64::max);
        let reference = self.window(len.saturating_sub(PEAK_REFERENCE_WINDOW), len);
        if recent_max > mean(&reference) * EMPHASIS_PEAK_RATIO {
            return false;
        }

        if previous_mean > 0.0 {
            let drop_ratio = (previous_mean - recent_mean) / previous_mean;
            return drop_ratio > self.drop_threshold;
        }
        false
    }

    fn window(&self, start: usize, end: usize) -> Vec<f64> {
        self.history.range(start..end).copied().collect()
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
