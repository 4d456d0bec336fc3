//! Audio sources: the live microphone, WAV replay, and scripted frames.
//!
//! A source is opened on the capture thread and yields fixed-size mono i16
//! frames in the requested format until it fails or runs out.

use super::dispatch::FrameDispatcher;
use super::frame::{AudioFrame, FrameFormat};
use super::resample::{f32_to_i16, RateConverter, StreamResampler};
use crate::error::{ReadError, RecorderError, RecorderResult};
use crate::lock::lock_or_recover;
use crate::log_debug;
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use hound::WavReader;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Consecutive empty one-frame polls before a stall counts as a read failure.
const MIC_STALL_POLLS: u32 = 4;

/// Opens frame streams in a requested format.
pub trait AudioSource: Send + Sync {
    fn open(&self, format: &FrameFormat) -> RecorderResult<Box<dyn FrameStream>>;

    fn describe(&self) -> String;
}

/// An open source. Lives on the capture thread.
pub trait FrameStream {
    /// Block until a full frame is available, or fail.
    fn read_frame(&mut self) -> Result<AudioFrame, ReadError>;

    /// Discard buffered input without processing it. Returns frames dropped.
    fn drain(&mut self) -> usize {
        0
    }

    /// Frames lost before they reached `read_frame`.
    fn dropped_frames(&self) -> usize {
        0
    }

    fn close(&mut self) {}
}

/// List microphone names so the CLI can expose a selector.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host.input_devices().context("no input devices available")?;
    Ok(devices.filter_map(|device| device.name().ok()).collect())
}

/// The system microphone via cpal, optionally a named device.
#[derive(Debug, Clone, Default)]
pub struct CpalSource {
    device_name: Option<String>,
    channel_capacity: usize,
}

impl CpalSource {
    pub fn new(device_name: Option<String>, channel_capacity: usize) -> Self {
        Self {
            device_name,
            channel_capacity: channel_capacity.max(1),
        }
    }

    fn find_device(&self) -> RecorderResult<cpal::Device> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => {
                let mut devices = host.input_devices().map_err(|err| {
                    RecorderError::SourceUnavailable(format!("no input devices available: {err}"))
                })?;
                devices
                    .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
                    .ok_or_else(|| {
                        RecorderError::SourceUnavailable(format!("input device '{name}' not found"))
                    })
            }
            None => host.default_input_device().ok_or_else(|| {
                RecorderError::SourceUnavailable(format!(
                    "no default input device available. {}",
                    mic_permission_hint()
                ))
            }),
        }
    }
}

impl AudioSource for CpalSource {
    fn open(&self, format: &FrameFormat) -> RecorderResult<Box<dyn FrameStream>> {
        let device = self.find_device()?;
        let unavailable = |err: &dyn std::fmt::Display| {
            RecorderError::SourceUnavailable(format!("{err}. {}", mic_permission_hint()))
        };
        let default_config = device
            .default_input_config()
            .map_err(|err| unavailable(&err))?;
        let sample_format = default_config.sample_format();
        let device_config: StreamConfig = default_config.into();
        let device_rate = device_config.sample_rate.0;
        let channels = usize::from(device_config.channels.max(1));
        let device_frame_samples = ((format.frame_size as u64 * u64::from(device_rate))
            / u64::from(format.sample_rate.max(1)))
        .max(1) as usize;
        let device_name = device.name().unwrap_or_else(|_| "unknown device".to_string());
        log_debug(&format!(
            "mic config: device={device_name} format={sample_format:?} rate={device_rate}Hz channels={channels} frame={device_frame_samples}"
        ));

        let (sender, receiver) = bounded::<Vec<f32>>(self.channel_capacity);
        let dropped = Arc::new(AtomicUsize::new(0));
        let dispatcher = Arc::new(Mutex::new(FrameDispatcher::new(
            device_frame_samples,
            sender,
            dropped.clone(),
        )));
        let stream_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let error_slot = stream_error.clone();
        let err_fn = move |err: cpal::StreamError| {
            log_debug(&format!("audio_stream_error: {err}"));
            if matches!(err, cpal::StreamError::DeviceNotAvailable) {
                *lock_or_recover(&error_slot, "mic_stream_error") = Some(err.to_string());
            }
        };

        macro_rules! input_stream {
            ($sample:ty, $convert:expr) => {{
                let dispatcher = dispatcher.clone();
                let dropped = dropped.clone();
                device.build_input_stream(
                    &device_config,
                    move |data: &[$sample], _| {
                        if let Ok(mut pump) = dispatcher.try_lock() {
                            pump.push(data, channels, $convert);
                        } else {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    err_fn,
                    None,
                )
            }};
        }

        let stream = match sample_format {
            SampleFormat::F32 => input_stream!(f32, |s: f32| s),
            SampleFormat::I16 => input_stream!(i16, |s: i16| f32::from(s) / 32_768.0),
            SampleFormat::U16 => {
                input_stream!(u16, |s: u16| (f32::from(s) - 32_768.0) / 32_768.0)
            }
            other => {
                return Err(RecorderError::SourceUnavailable(format!(
                    "unsupported sample format: {other:?}"
                )))
            }
        }
        .map_err(|err| unavailable(&err))?;
        stream.play().map_err(|err| unavailable(&err))?;

        Ok(Box::new(CpalStream {
            stream: Some(stream),
            receiver,
            resampler: RateConverter::new(device_rate, format.sample_rate).stream(),
            frame_size: format.frame_size,
            poll_timeout: format.frame_duration(),
            stalled_polls: 0,
            dropped,
            stream_error,
        }))
    }

    fn describe(&self) -> String {
        match &self.device_name {
            Some(name) => format!("microphone '{name}'"),
            None => "default microphone".to_string(),
        }
    }
}

struct CpalStream {
    stream: Option<cpal::Stream>,
    receiver: Receiver<Vec<f32>>,
    resampler: StreamResampler,
    frame_size: usize,
    poll_timeout: Duration,
    stalled_polls: u32,
    dropped: Arc<AtomicUsize>,
    stream_error: Arc<Mutex<Option<String>>>,
}

impl FrameStream for CpalStream {
    fn read_frame(&mut self) -> Result<AudioFrame, ReadError> {
        if let Some(err) = lock_or_recover(&self.stream_error, "mic_stream_error").clone() {
            return Err(ReadError::Disconnected(err));
        }
        loop {
            if let Some(samples) = self.resampler.next_frame(self.frame_size) {
                self.stalled_polls = 0;
                return Ok(AudioFrame::new(samples));
            }
            match self.receiver.recv_timeout(self.poll_timeout) {
                Ok(raw) => self.resampler.push(&raw),
                Err(RecvTimeoutError::Timeout) => {
                    self.stalled_polls += 1;
                    if self.stalled_polls < MIC_STALL_POLLS {
                        return Err(ReadError::Pending);
                    }
                    let stalled = self.poll_timeout * self.stalled_polls;
                    self.stalled_polls = 0;
                    return Err(ReadError::Transient(format!(
                        "no audio within {}ms",
                        stalled.as_millis()
                    )));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ReadError::Disconnected(
                        "audio stream disconnected".to_string(),
                    ))
                }
            }
        }
    }

    fn drain(&mut self) -> usize {
        self.resampler.clear();
        self.stalled_polls = 0;
        self.receiver.try_iter().count()
    }

    fn dropped_frames(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(err) = stream.pause() {
                log_debug(&format!("failed to pause audio stream: {err}"));
            }
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn mic_permission_hint() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macOS: System Settings > Privacy & Security > Microphone (enable your terminal)."
    }
    #[cfg(target_os = "linux")]
    {
        "Linux: check PipeWire/PulseAudio permissions and ensure the device is not muted."
    }
    #[cfg(target_os = "windows")]
    {
        "Windows: Settings > Privacy & Security > Microphone (allow access for your terminal)."
    }
    #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
    {
        "Check OS microphone permissions."
    }
}

/// Replays an integer-PCM WAV file, converted to the requested format.
#[derive(Debug, Clone)]
pub struct WavFileSource {
    path: PathBuf,
    paced: bool,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            paced: false,
        }
    }

    /// Deliver frames at the capture rate instead of as fast as possible.
    pub fn paced(mut self, paced: bool) -> Self {
        self.paced = paced;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Load `path` as mono i16 samples at `target_rate`.
pub fn load_wav_samples(path: &Path, target_rate: u32) -> Result<Vec<i16>> {
    let mut reader =
        WavReader::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        anyhow::bail!(
            "{} must be 16-bit integer PCM (got {} bits, {:?})",
            path.display(),
            spec.bits_per_sample,
            spec.sample_format
        );
    }
    let raw: Vec<i16> = reader
        .samples::<i16>()
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("failed to decode {}", path.display()))?;

    let channels = usize::from(spec.channels.max(1));
    if channels == 1 && spec.sample_rate == target_rate {
        return Ok(raw);
    }
    let mut mono = Vec::with_capacity(raw.len() / channels + 1);
    super::dispatch::downmix_into(&mut mono, &raw, channels, |s| f32::from(s) / 32_768.0);
    let converter = RateConverter::new(spec.sample_rate, target_rate);
    Ok(converter.convert(&mono).into_iter().map(f32_to_i16).collect())
}

impl AudioSource for WavFileSource {
    fn open(&self, format: &FrameFormat) -> RecorderResult<Box<dyn FrameStream>> {
        let samples = load_wav_samples(&self.path, format.sample_rate)
            .map_err(|err| RecorderError::SourceUnavailable(format!("{err:#}")))?;
        log_debug(&format!(
            "replaying {} ({} samples)",
            self.path.display(),
            samples.len()
        ));
        let frames = chunk_frames(&samples, format.frame_size);
        Ok(Box::new(ScriptedStream {
            steps: frames.into_iter().map(ScriptStep::Frame).collect(),
            tail: None,
            pace: self.paced.then(|| format.frame_duration()),
        }))
    }

    fn describe(&self) -> String {
        format!("wav replay '{}'", self.path.display())
    }
}

/// Split samples into frames, zero-padding the final partial frame.
pub fn chunk_frames(samples: &[i16], frame_size: usize) -> Vec<AudioFrame> {
    samples
        .chunks(frame_size.max(1))
        .map(|chunk| {
            let mut frame = chunk.to_vec();
            if frame.len() < frame_size {
                frame.resize(frame_size, 0);
            }
            AudioFrame::new(frame)
        })
        .collect()
}

/// One scripted read result.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    Frame(AudioFrame),
    Fail(ReadError),
}

/// In-memory source that plays back a fixed script of frames and failures.
///
/// After the script the stream reports `Exhausted`, or repeats a tail frame
/// forever when one is set. Every `open` starts the script from the top.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    steps: Vec<ScriptStep>,
    tail: Option<AudioFrame>,
    pace: Option<Duration>,
    open_error: Option<String>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames cut from raw PCM, zero-padding the last one.
    pub fn from_pcm(samples: &[i16], frame_size: usize) -> Self {
        Self::new().frames(chunk_frames(samples, frame_size))
    }

    pub fn frame(mut self, frame: AudioFrame) -> Self {
        self.steps.push(ScriptStep::Frame(frame));
        self
    }

    pub fn frames(mut self, frames: impl IntoIterator<Item = AudioFrame>) -> Self {
        self.steps.extend(frames.into_iter().map(ScriptStep::Frame));
        self
    }

    /// `count` frames of constant amplitude `level`.
    pub fn level(self, level: i16, count: usize, frame_size: usize) -> Self {
        self.frames((0..count).map(|_| AudioFrame::constant(level, frame_size)))
    }

    pub fn fail(mut self, err: ReadError) -> Self {
        self.steps.push(ScriptStep::Fail(err));
        self
    }

    /// Keep yielding `frame` once the script is used up.
    pub fn repeat_after(mut self, frame: AudioFrame) -> Self {
        self.tail = Some(frame);
        self
    }

    /// Sleep this long before each read, like a live device.
    pub fn paced(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }

    /// Make `open` fail with `SourceUnavailable`.
    pub fn failing_open(mut self, message: impl Into<String>) -> Self {
        self.open_error = Some(message.into());
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl AudioSource for ScriptedSource {
    fn open(&self, _format: &FrameFormat) -> RecorderResult<Box<dyn FrameStream>> {
        if let Some(message) = &self.open_error {
            return Err(RecorderError::SourceUnavailable(message.clone()));
        }
        Ok(Box::new(ScriptedStream {
            steps: self.steps.iter().cloned().collect(),
            tail: self.tail.clone(),
            pace: self.pace,
        }))
    }

    fn describe(&self) -> String {
        format!("scripted source ({} steps)", self.steps.len())
    }
}

struct ScriptedStream {
    steps: VecDeque<ScriptStep>,
    tail: Option<AudioFrame>,
    pace: Option<Duration>,
}

impl FrameStream for ScriptedStream {
    fn read_frame(&mut self) -> Result<AudioFrame, ReadError> {
        if let Some(pace) = self.pace {
            std::thread::sleep(pace);
        }
        match self.steps.pop_front() {
            Some(ScriptStep::Frame(frame)) => Ok(frame),
            Some(ScriptStep::Fail(err)) => Err(err),
            None => self.tail.clone().ok_or(ReadError::Exhausted),
        }
    }
}
