//! Command-line parsing and the immutable detector/recorder configuration.

mod defaults;
mod validation;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use defaults::default_output_dir;
pub use defaults::{
    default_classifier_kind, sensitivity_preset, SensitivityPreset, DEFAULT_FRAME_CHANNEL_CAPACITY,
    DEFAULT_FRAME_SIZE, DEFAULT_MAX_RECORDING_SECS, DEFAULT_MAX_SPEECH_SECS,
    DEFAULT_MAX_ZERO_CROSSING_RATE, DEFAULT_MIN_AUDIO_ENERGY, DEFAULT_NOISE_ADAPTATION_FRAMES,
    DEFAULT_NOISE_MULTIPLIER, DEFAULT_PAUSE_TOLERANCE_SECS, DEFAULT_SAMPLE_RATE,
    DEFAULT_SECONDARY_WEIGHT, DEFAULT_SENSITIVITY, DEFAULT_VOLUME_DROP_THRESHOLD,
    DEFAULT_VOLUME_HISTORY, DEFAULT_VOLUME_WEIGHT,
};

/// CLI options for the voxlisten utterance recorder.
///
/// Detector tuning flags are optional so that an explicit value always wins
/// over the `--sensitivity` preset it would otherwise come from.
#[derive(Debug, Parser, Clone)]
#[command(about = "voxlisten: hands-free utterance recorder", author, version)]
pub struct AppConfig {
    /// Preferred audio input device name
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print detected audio input devices and exit
    #[arg(long = "list-input-devices", default_value_t = false)]
    pub list_input_devices: bool,

    /// Replay a 16-bit mono WAV file instead of opening a microphone
    #[arg(long = "replay-wav", value_name = "PATH")]
    pub replay_wav: Option<PathBuf>,

    /// Feed replayed audio at real-time pace instead of as fast as possible
    #[arg(long = "replay-realtime", default_value_t = false, requires = "replay_wav")]
    pub replay_realtime: bool,

    /// Directory that completed utterances are written to
    #[arg(long = "output-dir", default_value_os_t = default_output_dir())]
    pub output_dir: PathBuf,

    /// Enable file logging (debug)
    #[arg(long = "logs", env = "VOXLISTEN_LOGS", default_value_t = false)]
    pub logs: bool,

    /// Disable all file logging (overrides --logs and log env vars)
    #[arg(long = "no-logs", env = "VOXLISTEN_NO_LOGS", default_value_t = false)]
    pub no_logs: bool,

    /// Emit per-frame detector traces into the debug log
    #[arg(long = "vad-debug", default_value_t = false)]
    pub vad_debug: bool,

    /// Sensitivity preset: 1=quiet room .. 4=very noisy room
    #[arg(long, default_value_t = DEFAULT_SENSITIVITY, value_parser = clap::value_parser!(u8).range(1..=4))]
    pub sensitivity: u8,

    /// Capture sample rate (Hz)
    #[arg(long = "sample-rate", default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: u32,

    /// Samples per analysis frame
    #[arg(long = "frame-size", default_value_t = DEFAULT_FRAME_SIZE)]
    pub frame_size: usize,

    /// Minimum RMS volume that can count as speech (overrides preset)
    #[arg(long = "base-volume-threshold")]
    pub base_volume_threshold: Option<f64>,

    /// Noise baseline multiplier used to derive the detection threshold
    #[arg(long = "noise-multiplier", default_value_t = DEFAULT_NOISE_MULTIPLIER)]
    pub noise_multiplier: f64,

    /// Idle frames sampled to learn the noise baseline
    #[arg(long = "noise-adaptation-frames", default_value_t = DEFAULT_NOISE_ADAPTATION_FRAMES)]
    pub noise_adaptation_frame_count: usize,

    /// Disable noise-floor adaptation
    #[arg(long = "no-noise-adaptation", default_value_t = false)]
    pub no_noise_adaptation: bool,

    /// Per-frame confidence above which a frame counts as speech (overrides preset)
    #[arg(long = "confidence-threshold")]
    pub confidence_threshold: Option<f64>,

    /// Consecutive speech frames before a candidate is tracked (overrides preset)
    #[arg(long = "detection-frames")]
    pub detection_frames: Option<u32>,

    /// Consecutive speech frames before recording starts (overrides preset)
    #[arg(long = "confirmation-frames")]
    pub confirmation_frames: Option<u32>,

    /// Consecutive silent frames that end an utterance (overrides preset)
    #[arg(long = "silence-frames-limit")]
    pub silence_frames_limit: Option<u32>,

    /// Shortest utterance that silence may end, in seconds (overrides preset)
    #[arg(long = "min-speech-secs")]
    pub min_speech_secs: Option<f64>,

    /// Hard cap on a single utterance inside the detector, in seconds
    #[arg(long = "max-speech-secs", default_value_t = DEFAULT_MAX_SPEECH_SECS)]
    pub max_speech_secs: f64,

    /// Recorder-level cap on a single recording, in seconds
    #[arg(long = "max-recording-secs", default_value_t = DEFAULT_MAX_RECORDING_SECS)]
    pub max_recording_secs: f64,

    /// Longest in-utterance pause treated as a breath, in seconds
    #[arg(long = "pause-tolerance-secs", default_value_t = DEFAULT_PAUSE_TOLERANCE_SECS)]
    pub pause_tolerance_secs: f64,

    /// Relative volume drop (0..1] that ends an utterance
    #[arg(long = "volume-drop-threshold", default_value_t = DEFAULT_VOLUME_DROP_THRESHOLD)]
    pub volume_drop_threshold: f64,

    /// Weight of the secondary classifier in the fused confidence
    #[arg(long = "secondary-weight", default_value_t = DEFAULT_SECONDARY_WEIGHT)]
    pub secondary_classifier_weight: f64,

    /// Weight of the volume signal in the fused confidence
    #[arg(long = "volume-weight", default_value_t = DEFAULT_VOLUME_WEIGHT)]
    pub volume_weight: f64,

    /// Secondary speech classifier implementation
    #[arg(long = "classifier", value_enum, default_value_t = default_classifier_kind())]
    pub classifier: ClassifierKind,

    /// Run on volume alone, without a secondary classifier
    #[arg(long = "no-secondary-classifier", default_value_t = false)]
    pub no_secondary_classifier: bool,

    /// Classifier aggressiveness 0..=3 (overrides preset)
    #[arg(long = "classifier-aggressiveness")]
    pub classifier_aggressiveness: Option<u8>,

    /// Frames buffered between the audio callback and the capture thread
    #[arg(long = "frame-channel-capacity", default_value_t = DEFAULT_FRAME_CHANNEL_CAPACITY)]
    pub frame_channel_capacity: usize,
}

/// Available secondary speech classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    Earshot,
    EnergyPattern,
}

impl ClassifierKind {
    pub fn label(self) -> &'static str {
        match self {
            ClassifierKind::Earshot => "earshot",
            ClassifierKind::EnergyPattern => "energy_pattern",
        }
    }
}

/// Tunable parameters shared by every detector component and the recorder.
///
/// Built once and handed to constructors; nothing reads ambient settings.
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub base_volume_threshold: f64,
    pub noise_multiplier: f64,
    pub noise_adaptation_frame_count: usize,
    pub enable_noise_adaptation: bool,
    pub confidence_threshold: f64,
    pub detection_frames: u32,
    pub confirmation_frames: u32,
    pub silence_frames_limit: u32,
    pub min_speech_duration: Duration,
    pub max_speech_duration: Duration,
    pub max_recording_duration: Duration,
    pub pause_tolerance: Duration,
    pub volume_drop_threshold: f64,
    pub volume_history_capacity: usize,
    pub secondary_classifier_weight: f64,
    pub volume_weight: f64,
    pub enable_secondary_classifier: bool,
    pub classifier_kind: ClassifierKind,
    pub classifier_aggressiveness: u8,
    pub min_audio_energy: f64,
    pub max_zero_crossing_rate: f64,
    pub frame_channel_capacity: usize,
    pub debug: bool,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::from_preset(sensitivity_preset(DEFAULT_SENSITIVITY))
    }
}

impl VadConfig {
    /// Defaults with the detector knobs taken from a sensitivity preset.
    pub fn from_preset(preset: SensitivityPreset) -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            base_volume_threshold: preset.base_volume_threshold,
            noise_multiplier: DEFAULT_NOISE_MULTIPLIER,
            noise_adaptation_frame_count: DEFAULT_NOISE_ADAPTATION_FRAMES,
            enable_noise_adaptation: true,
            confidence_threshold: preset.confidence_threshold,
            detection_frames: preset.detection_frames,
            confirmation_frames: preset.confirmation_frames,
            silence_frames_limit: preset.silence_frames_limit,
            min_speech_duration: Duration::from_secs_f64(preset.min_speech_secs),
            max_speech_duration: Duration::from_secs_f64(DEFAULT_MAX_SPEECH_SECS),
            max_recording_duration: Duration::from_secs_f64(DEFAULT_MAX_RECORDING_SECS),
            pause_tolerance: Duration::from_secs_f64(DEFAULT_PAUSE_TOLERANCE_SECS),
            volume_drop_threshold: DEFAULT_VOLUME_DROP_THRESHOLD,
            volume_history_capacity: DEFAULT_VOLUME_HISTORY,
            secondary_classifier_weight: DEFAULT_SECONDARY_WEIGHT,
            volume_weight: DEFAULT_VOLUME_WEIGHT,
            enable_secondary_classifier: true,
            classifier_kind: default_classifier_kind(),
            classifier_aggressiveness: preset.classifier_aggressiveness,
            min_audio_energy: DEFAULT_MIN_AUDIO_ENERGY,
            max_zero_crossing_rate: DEFAULT_MAX_ZERO_CROSSING_RATE,
            frame_channel_capacity: DEFAULT_FRAME_CHANNEL_CAPACITY,
            debug: false,
        }
    }

    /// Wall-clock length of one frame at the configured rate.
    pub fn frame_duration(&self) -> Duration {
        crate::audio::frame_duration(self.sample_rate, self.frame_size)
    }
}
