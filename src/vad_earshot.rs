//! Earshot-powered speech classifier implementing `SpeechClassifier`.

use crate::audio::{AudioFrame, SpeechClassifier, SPEECH_CONFIDENCE};
use crate::config::VadConfig;
use earshot::{VoiceActivityDetector, VoiceActivityProfile};

/// Sub-frame lengths earshot accepts at 16 kHz (10, 20 and 30 ms).
const SUBFRAME_SIZES: [usize; 3] = [160, 320, 480];
const MAX_SUBFRAME: usize = 480;

/// Splits each capture frame into earshot-sized windows and reports
/// `SPEECH_CONFIDENCE` scaled by the share of windows classified as speech.
pub struct EarshotClassifier {
    detector: VoiceActivityDetector,
    scratch: Vec<i16>,
}

impl EarshotClassifier {
    pub fn from_config(cfg: &VadConfig) -> Self {
        let profile = match cfg.classifier_aggressiveness {
            0 => VoiceActivityProfile::QUALITY,
            1 => VoiceActivityProfile::LBR,
            2 => VoiceActivityProfile::AGGRESSIVE,
            _ => VoiceActivityProfile::VERY_AGGRESSIVE,
        };
        Self {
            detector: VoiceActivityDetector::new(profile),
            scratch: Vec::with_capacity(MAX_SUBFRAME),
        }
    }
}

/// Smallest accepted window that holds `len` samples.
fn padded_len(len: usize) -> usize {
    SUBFRAME_SIZES
        .iter()
        .copied()
        .find(|&size| size >= len)
        .unwrap_or(MAX_SUBFRAME)
}

impl SpeechClassifier for EarshotClassifier {
    fn confidence(&mut self, frame: &AudioFrame) -> f64 {
        let mut windows = 0usize;
        let mut voiced = 0usize;
        for chunk in frame.samples().chunks(MAX_SUBFRAME) {
            self.scratch.clear();
            self.scratch.extend_from_slice(chunk);
            self.scratch.resize(padded_len(chunk.len()), 0);
            windows += 1;
            // A rejected window counts as non-speech.
            if let Ok(true) = self.detector.predict_16khz(&self.scratch) {
                voiced += 1;
            }
        }
        if windows == 0 {
            return 0.0;
        }
        SPEECH_CONFIDENCE * voiced as f64 / windows as f64
    }

    fn reset(&mut self) {
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "earshot"
    }
}
