//! Fixed-size PCM frames and the frame-driven stream clock.

use crate::config::VadConfig;
use std::time::Duration;

/// Bytes per sample for 16-bit signed PCM.
pub const SAMPLE_WIDTH_BYTES: u16 = 2;

/// Capture parameters every frame in a session shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub frame_size: usize,
}

impl FrameFormat {
    pub fn mono(sample_rate: u32, frame_size: usize) -> Self {
        Self {
            sample_rate,
            channels: super::CAPTURE_CHANNELS,
            frame_size,
        }
    }

    pub fn from_config(cfg: &VadConfig) -> Self {
        Self::mono(cfg.sample_rate, cfg.frame_size)
    }

    pub fn sample_width(&self) -> u16 {
        SAMPLE_WIDTH_BYTES
    }

    pub fn frame_duration(&self) -> Duration {
        frame_duration(self.sample_rate, self.frame_size)
    }
}

/// One block of mono i16 samples. Immutable once captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Box<[i16]>,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self {
            samples: samples.into_boxed_slice(),
        }
    }

    /// A zero-filled frame, used when a read hiccup is treated as silence.
    pub fn silent(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    /// A frame of `len` samples at a constant amplitude, so its RMS equals `level`.
    pub fn constant(level: i16, len: usize) -> Self {
        Self::new(vec![level; len])
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Root-mean-square amplitude in raw sample units.
    pub fn rms(&self) -> f64 {
        rms(&self.samples)
    }
}

/// Exact frame length in nanoseconds, avoiding float rounding.
pub(crate) fn frame_duration(sample_rate: u32, frame_size: usize) -> Duration {
    let nanos = (frame_size as u64).saturating_mul(1_000_000_000) / u64::from(sample_rate.max(1));
    Duration::from_nanos(nanos)
}

pub(crate) fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let energy: f64 = samples
        .iter()
        .map(|&s| {
            let s = f64::from(s);
            s * s
        })
        .sum::<f64>()
        / samples.len() as f64;
    energy.sqrt()
}

/// Stream time derived from processed frames rather than the wall clock.
///
/// Only frames that reach the detector advance the clock, so time stays
/// frozen while the recorder is paused.
#[derive(Debug, Clone)]
pub struct FrameClock {
    frame_duration: Duration,
    frames: u64,
}

impl FrameClock {
    pub fn new(frame_duration: Duration) -> Self {
        Self {
            frame_duration,
            frames: 0,
        }
    }

    /// Advance by one frame and return the stream time at the end of it.
    pub fn tick(&mut self) -> Duration {
        self.frames = self.frames.saturating_add(1);
        self.now()
    }

    pub fn now(&self) -> Duration {
        self.frame_duration
            .saturating_mul(u32::try_from(self.frames).unwrap_or(u32::MAX))
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_frame_rms_matches_level() {
        let frame = AudioFrame::constant(-100, 512);
        assert!((frame.rms() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn empty_frame_has_zero_rms() {
        assert_eq!(AudioFrame::new(Vec::new()).rms(), 0.0);
    }

    #[test]
    fn rms_handles_extreme_samples_without_overflow() {
        let frame = AudioFrame::new(vec![i16::MIN, i16::MAX]);
        assert!(frame.rms() > 32_000.0);
    }

    #[test]
    fn frame_clock_advances_per_tick() {
        let mut clock = FrameClock::new(Duration::from_millis(64));
        assert_eq!(clock.now(), Duration::ZERO);
        assert_eq!(clock.tick(), Duration::from_millis(64));
        assert_eq!(clock.tick(), Duration::from_millis(128));
        assert_eq!(clock.frames(), 2);
    }

    #[test]
    fn frame_format_reports_pcm_layout() {
        let format = FrameFormat::mono(16_000, 1024);
        assert_eq!(format.channels, 1);
        assert_eq!(format.sample_width(), 2);
        assert_eq!(format.frame_duration(), Duration::from_millis(64));
    }
}
