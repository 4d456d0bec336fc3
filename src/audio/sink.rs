//! Completed utterances and the sinks that persist them.

use super::frame::{AudioFrame, FrameFormat};
use crate::lock::lock_or_recover;
use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// An ordered run of frames captured as one utterance, plus the capture format.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    frames: Vec<AudioFrame>,
    format: FrameFormat,
}

impl Utterance {
    pub fn new(frames: Vec<AudioFrame>, format: FrameFormat) -> Self {
        Self { frames, format }
    }

    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.iter().all(AudioFrame::is_empty)
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(AudioFrame::len).sum()
    }

    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.frames
            .iter()
            .flat_map(|frame| frame.samples().iter().copied())
    }

    pub fn duration(&self) -> Duration {
        let nanos = (self.sample_count() as u64).saturating_mul(1_000_000_000)
            / u64::from(self.format.sample_rate.max(1));
        Duration::from_nanos(nanos)
    }

    /// RMS over every sample in the utterance.
    pub fn mean_rms(&self) -> f64 {
        let count = self.sample_count();
        if count == 0 {
            return 0.0;
        }
        let energy: f64 = self
            .samples()
            .map(|s| {
                let s = f64::from(s);
                s * s
            })
            .sum();
        (energy / count as f64).sqrt()
    }
}

/// Opaque identifier a sink returns for a persisted utterance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UtteranceHandle(String);

impl UtteranceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UtteranceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Path> for UtteranceHandle {
    fn from(path: &Path) -> Self {
        Self(path.display().to_string())
    }
}

/// Destination for completed utterances.
///
/// `persist` must have fully written the utterance before it returns a handle.
pub trait UtteranceSink: Send {
    fn persist(&mut self, utterance: &Utterance) -> Result<UtteranceHandle>;
}

/// Writes each utterance as a 16-bit PCM WAV file in `output_dir`.
#[derive(Debug)]
pub struct WavFileSink {
    output_dir: PathBuf,
    prefix: String,
    sequence: u64,
}

impl WavFileSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: "utterance".to_string(),
            sequence: 0,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn next_path(&mut self) -> PathBuf {
        self.sequence = self.sequence.wrapping_add(1);
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis())
            .unwrap_or_default();
        self.output_dir
            .join(format!("{}_{millis}_{:04}.wav", self.prefix, self.sequence))
    }
}

impl UtteranceSink for WavFileSink {
    fn persist(&mut self, utterance: &Utterance) -> Result<UtteranceHandle> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("failed to create output dir {}", self.output_dir.display())
        })?;
        let path = self.next_path();
        write_wav(&path, utterance)?;
        Ok(UtteranceHandle::from(path.as_path()))
    }
}

/// Write `utterance` to `path` with the capture format it was recorded in.
pub fn write_wav(path: &Path, utterance: &Utterance) -> Result<()> {
    let format = utterance.format();
    let spec = WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: format.sample_width() * 8,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("failed to create {}", path.display()))?;
    for sample in utterance.samples() {
        writer
            .write_sample(sample)
            .with_context(|| format!("failed to write samples to {}", path.display()))?;
    }
    writer
        .finalize()
        .with_context(|| format!("failed to finalize {}", path.display()))?;
    Ok(())
}

/// Keeps utterances in memory. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    store: Arc<Mutex<Vec<Utterance>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        lock_or_recover(&self.store, "memory_sink").clone()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.store, "memory_sink").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl UtteranceSink for MemorySink {
    fn persist(&mut self, utterance: &Utterance) -> Result<UtteranceHandle> {
        let mut store = lock_or_recover(&self.store, "memory_sink");
        store.push(utterance.clone());
        Ok(UtteranceHandle::new(format!("memory:{}", store.len() - 1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavReader;

    fn utterance(levels: &[i16]) -> Utterance {
        let frames = levels
            .iter()
            .map(|&level| AudioFrame::constant(level, 160))
            .collect();
        Utterance::new(frames, FrameFormat::mono(16_000, 160))
    }

    fn temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("voxlisten_sink_{label}_{nanos}"))
    }

    #[test]
    fn utterance_reports_duration_and_rms() {
        let utterance = utterance(&[100, 100, 100, 100]);
        assert_eq!(utterance.frame_count(), 4);
        assert_eq!(utterance.sample_count(), 640);
        assert_eq!(utterance.duration(), Duration::from_millis(40));
        assert!((utterance.mean_rms() - 100.0).abs() < 1e-9);
        assert!(!utterance.is_empty());
    }

    #[test]
    fn empty_utterance_is_empty() {
        let utterance = Utterance::new(Vec::new(), FrameFormat::mono(16_000, 160));
        assert!(utterance.is_empty());
        assert_eq!(utterance.mean_rms(), 0.0);
    }

    #[test]
    fn wav_sink_writes_readable_file() {
        let dir = temp_dir("wav");
        let mut sink = WavFileSink::new(&dir);
        let utterance = utterance(&[100, -200, 300]);
        let handle = sink.persist(&utterance).expect("persist");
        let path = PathBuf::from(handle.as_str());
        assert!(path.starts_with(&dir));

        let mut reader = WavReader::open(&path).expect("open wav");
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.expect("sample")).collect();
        assert_eq!(samples.len(), 480);
        assert_eq!(samples[0], 100);
        assert_eq!(samples[160], -200);
        assert_eq!(samples[479], 300);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn wav_sink_names_are_unique() {
        let dir = temp_dir("unique");
        let mut sink = WavFileSink::new(&dir).with_prefix("take");
        let first = sink.persist(&utterance(&[1])).expect("persist");
        let second = sink.persist(&utterance(&[1])).expect("persist");
        assert_ne!(first, second);
        assert!(first.as_str().contains("take_"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn wav_sink_reports_unwritable_dir() {
        let dir = temp_dir("blocked");
        fs::write(&dir, b"not a directory").expect("write blocker");
        let mut sink = WavFileSink::new(dir.join("nested"));
        let err = sink.persist(&utterance(&[1])).expect_err("should fail");
        assert!(format!("{err:#}").contains("failed to create output dir"));
        let _ = fs::remove_file(&dir);
    }

    #[test]
    fn memory_sink_clones_share_store() {
        let sink = MemorySink::new();
        let mut writer = sink.clone();
        let handle = writer.persist(&utterance(&[5, 5])).expect("persist");
        assert_eq!(handle.as_str(), "memory:0");
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.utterances()[0].frame_count(), 2);
    }
}
