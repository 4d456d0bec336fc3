use super::defaults::{
    sensitivity_preset, EARSHOT_SAMPLE_RATE, MAX_FRAME_SIZE, MAX_SAMPLE_RATE,
    MAX_SPEECH_HARD_LIMIT_SECS, MIN_FRAME_SIZE, MIN_SAMPLE_RATE,
};
use super::{AppConfig, ClassifierKind, VadConfig};
use crate::error::{RecorderError, RecorderResult};
use anyhow::{bail, Result};
use std::time::Duration;

fn invalid(message: String) -> RecorderError {
    RecorderError::InvalidConfiguration(message)
}

fn ensure_secs(label: &str, value: Duration, max_secs: f64) -> RecorderResult<()> {
    let secs = value.as_secs_f64();
    if secs <= 0.0 || secs > max_secs {
        return Err(invalid(format!(
            "{label} must be within (0, {max_secs}] seconds, got {secs}"
        )));
    }
    Ok(())
}

impl VadConfig {
    /// Reject out-of-range parameters before any component is built.
    pub fn validate(&self) -> RecorderResult<()> {
        if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(invalid(format!(
                "sample_rate must be between {MIN_SAMPLE_RATE} and {MAX_SAMPLE_RATE} Hz, got {}",
                self.sample_rate
            )));
        }
        if !(MIN_FRAME_SIZE..=MAX_FRAME_SIZE).contains(&self.frame_size) {
            return Err(invalid(format!(
                "frame_size must be between {MIN_FRAME_SIZE} and {MAX_FRAME_SIZE} samples, got {}",
                self.frame_size
            )));
        }
        if !self.base_volume_threshold.is_finite() || self.base_volume_threshold <= 0.0 {
            return Err(invalid(format!(
                "base_volume_threshold must be positive, got {}",
                self.base_volume_threshold
            )));
        }
        if !self.noise_multiplier.is_finite() || self.noise_multiplier <= 0.0 {
            return Err(invalid(format!(
                "noise_multiplier must be positive, got {}",
                self.noise_multiplier
            )));
        }
        if self.enable_noise_adaptation && self.noise_adaptation_frame_count == 0 {
            return Err(invalid(
                "noise_adaptation_frame_count must be at least 1 when adaptation is enabled"
                    .to_string(),
            ));
        }
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold < 1.0) {
            return Err(invalid(format!(
                "confidence_threshold must be within (0, 1), got {}",
                self.confidence_threshold
            )));
        }
        if self.detection_frames == 0 || self.confirmation_frames == 0 {
            return Err(invalid(
                "detection_frames and confirmation_frames must be at least 1".to_string(),
            ));
        }
        if self.silence_frames_limit == 0 {
            return Err(invalid("silence_frames_limit must be at least 1".to_string()));
        }
        ensure_secs(
            "min_speech_duration",
            self.min_speech_duration,
            MAX_SPEECH_HARD_LIMIT_SECS,
        )?;
        ensure_secs(
            "max_speech_duration",
            self.max_speech_duration,
            MAX_SPEECH_HARD_LIMIT_SECS,
        )?;
        ensure_secs(
            "max_recording_duration",
            self.max_recording_duration,
            MAX_SPEECH_HARD_LIMIT_SECS,
        )?;
        ensure_secs(
            "pause_tolerance",
            self.pause_tolerance,
            MAX_SPEECH_HARD_LIMIT_SECS,
        )?;
        if self.min_speech_duration > self.max_speech_duration {
            return Err(invalid(format!(
                "min_speech_duration ({:?}) cannot exceed max_speech_duration ({:?})",
                self.min_speech_duration, self.max_speech_duration
            )));
        }
        if !(self.volume_drop_threshold > 0.0 && self.volume_drop_threshold <= 1.0) {
            return Err(invalid(format!(
                "volume_drop_threshold must be within (0, 1], got {}",
                self.volume_drop_threshold
            )));
        }
        // detect_drop needs 16 history entries for its two windows.
        if self.volume_history_capacity < 16 {
            return Err(invalid(format!(
                "volume_history_capacity must be at least 16, got {}",
                self.volume_history_capacity
            )));
        }
        for (label, weight) in [
            ("secondary_classifier_weight", self.secondary_classifier_weight),
            ("volume_weight", self.volume_weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                return Err(invalid(format!("{label} must be within [0, 1], got {weight}")));
            }
        }
        if self.classifier_aggressiveness > 3 {
            return Err(invalid(format!(
                "classifier_aggressiveness must be between 0 and 3, got {}",
                self.classifier_aggressiveness
            )));
        }
        if !(0.0..=1.0).contains(&self.max_zero_crossing_rate) {
            return Err(invalid(format!(
                "max_zero_crossing_rate must be within [0, 1], got {}",
                self.max_zero_crossing_rate
            )));
        }
        if self.min_audio_energy < 0.0 {
            return Err(invalid(format!(
                "min_audio_energy cannot be negative, got {}",
                self.min_audio_energy
            )));
        }
        if self.frame_channel_capacity == 0 {
            return Err(invalid("frame_channel_capacity must be at least 1".to_string()));
        }
        if self.enable_secondary_classifier && self.classifier_kind == ClassifierKind::Earshot {
            if !cfg!(feature = "vad_earshot") {
                return Err(invalid(
                    "earshot classifier requires building with the 'vad_earshot' feature"
                        .to_string(),
                ));
            }
            if self.sample_rate != EARSHOT_SAMPLE_RATE {
                return Err(invalid(format!(
                    "earshot classifier requires a {EARSHOT_SAMPLE_RATE} Hz sample rate, got {}",
                    self.sample_rate
                )));
            }
        }
        Ok(())
    }
}

impl AppConfig {
    /// Check CLI-only values, then the resolved detector configuration.
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.replay_wav {
            if !path.is_file() {
                bail!("--replay-wav '{}' is not a readable file", path.display());
            }
        }
        if self.output_dir.as_os_str().is_empty() {
            bail!("--output-dir must not be empty");
        }
        if let Some(device) = &self.input_device {
            if device.trim().is_empty() || device.len() > 256 {
                bail!("--input-device must be 1..=256 characters");
            }
        }
        self.vad_config().validate()?;
        Ok(())
    }

    /// Snapshot the resolved detector settings: explicit flags over preset values.
    pub fn vad_config(&self) -> VadConfig {
        let preset = sensitivity_preset(self.sensitivity);
        let mut cfg = VadConfig::from_preset(preset);
        cfg.sample_rate = self.sample_rate;
        cfg.frame_size = self.frame_size;
        cfg.base_volume_threshold = self
            .base_volume_threshold
            .unwrap_or(preset.base_volume_threshold);
        cfg.noise_multiplier = self.noise_multiplier;
        cfg.noise_adaptation_frame_count = self.noise_adaptation_frame_count;
        cfg.enable_noise_adaptation = !self.no_noise_adaptation;
        cfg.confidence_threshold = self
            .confidence_threshold
            .unwrap_or(preset.confidence_threshold);
        cfg.detection_frames = self.detection_frames.unwrap_or(preset.detection_frames);
        cfg.confirmation_frames = self
            .confirmation_frames
            .unwrap_or(preset.confirmation_frames);
        cfg.silence_frames_limit = self
            .silence_frames_limit
            .unwrap_or(preset.silence_frames_limit);
        cfg.min_speech_duration = secs_or_zero(self.min_speech_secs.unwrap_or(preset.min_speech_secs));
        cfg.max_speech_duration = secs_or_zero(self.max_speech_secs);
        cfg.max_recording_duration = secs_or_zero(self.max_recording_secs);
        cfg.pause_tolerance = secs_or_zero(self.pause_tolerance_secs);
        cfg.volume_drop_threshold = self.volume_drop_threshold;
        cfg.secondary_classifier_weight = self.secondary_classifier_weight;
        cfg.volume_weight = self.volume_weight;
        cfg.enable_secondary_classifier = !self.no_secondary_classifier;
        cfg.classifier_kind = self.classifier;
        cfg.classifier_aggressiveness = self
            .classifier_aggressiveness
            .unwrap_or(preset.classifier_aggressiveness);
        cfg.frame_channel_capacity = self.frame_channel_capacity;
        cfg.debug = self.vad_debug;
        cfg
    }
}

/// Negative or non-finite seconds collapse to zero so `validate` reports them.
fn secs_or_zero(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs_f64(secs.min(f64::from(u32::MAX)))
    } else {
        Duration::ZERO
    }
}
