use super::ClassifierKind;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;
pub const DEFAULT_FRAME_SIZE: usize = 1024;
pub const DEFAULT_NOISE_MULTIPLIER: f64 = 3.5;
pub const DEFAULT_NOISE_ADAPTATION_FRAMES: usize = 30;
pub const DEFAULT_MAX_SPEECH_SECS: f64 = 20.0;
pub const DEFAULT_MAX_RECORDING_SECS: f64 = 15.0;
pub const DEFAULT_PAUSE_TOLERANCE_SECS: f64 = 1.5;
pub const DEFAULT_VOLUME_DROP_THRESHOLD: f64 = 0.65;
pub const DEFAULT_SECONDARY_WEIGHT: f64 = 0.6;
pub const DEFAULT_VOLUME_WEIGHT: f64 = 0.4;
pub const DEFAULT_VOLUME_HISTORY: usize = 30;
pub const DEFAULT_MIN_AUDIO_ENERGY: f64 = 100.0;
pub const DEFAULT_MAX_ZERO_CROSSING_RATE: f64 = 0.3;
pub const DEFAULT_FRAME_CHANNEL_CAPACITY: usize = 32;
pub const DEFAULT_SENSITIVITY: u8 = 2;

pub(super) const MIN_SAMPLE_RATE: u32 = 8_000;
pub(super) const MAX_SAMPLE_RATE: u32 = 96_000;
pub(super) const MIN_FRAME_SIZE: usize = 64;
pub(super) const MAX_FRAME_SIZE: usize = 16_384;
pub(super) const MAX_SPEECH_HARD_LIMIT_SECS: f64 = 300.0;
/// Earshot only ships a 16 kHz model path in this crate.
pub(super) const EARSHOT_SAMPLE_RATE: u32 = 16_000;

/// Tuning bundle behind `--sensitivity`. Lower levels trigger more easily.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensitivityPreset {
    pub base_volume_threshold: f64,
    pub classifier_aggressiveness: u8,
    pub confidence_threshold: f64,
    pub detection_frames: u32,
    pub confirmation_frames: u32,
    pub silence_frames_limit: u32,
    pub min_speech_secs: f64,
}

const PRESETS: [SensitivityPreset; 4] = [
    // 1: quiet room
    SensitivityPreset {
        base_volume_threshold: 25.0,
        classifier_aggressiveness: 0,
        confidence_threshold: 0.15,
        detection_frames: 2,
        confirmation_frames: 3,
        silence_frames_limit: 12,
        min_speech_secs: 0.8,
    },
    // 2: typical room
    SensitivityPreset {
        base_volume_threshold: 35.0,
        classifier_aggressiveness: 1,
        confidence_threshold: 0.25,
        detection_frames: 3,
        confirmation_frames: 4,
        silence_frames_limit: 15,
        min_speech_secs: 1.0,
    },
    // 3: noisy room
    SensitivityPreset {
        base_volume_threshold: 45.0,
        classifier_aggressiveness: 2,
        confidence_threshold: 0.35,
        detection_frames: 4,
        confirmation_frames: 5,
        silence_frames_limit: 18,
        min_speech_secs: 1.2,
    },
    // 4: very noisy room, only clear speech
    SensitivityPreset {
        base_volume_threshold: 60.0,
        classifier_aggressiveness: 3,
        confidence_threshold: 0.45,
        detection_frames: 5,
        confirmation_frames: 6,
        silence_frames_limit: 22,
        min_speech_secs: 1.5,
    },
];

/// Look up a preset by level (1..=4); out-of-range levels fall back to 3.
pub fn sensitivity_preset(level: u8) -> SensitivityPreset {
    match level {
        1..=4 => PRESETS[usize::from(level - 1)],
        _ => PRESETS[2],
    }
}

pub const fn default_classifier_kind() -> ClassifierKind {
    #[cfg(feature = "vad_earshot")]
    {
        ClassifierKind::Earshot
    }
    #[cfg(not(feature = "vad_earshot"))]
    {
        ClassifierKind::EnergyPattern
    }
}

pub(super) fn default_output_dir() -> PathBuf {
    env::var("VOXLISTEN_OUTPUT_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("voxlisten"))
}
