//! Optional secondary speech classifiers fused with the volume signal.

use super::frame::AudioFrame;
use crate::config::{ClassifierKind, VadConfig};

/// Confidence a binary classifier reports for a frame it calls speech.
pub const SPEECH_CONFIDENCE: f64 = 0.8;

/// Frame-level speech/non-speech detector used next to the volume signal.
///
/// Implementations report a confidence in `[0, 1]`. Binary detectors report
/// [`SPEECH_CONFIDENCE`] for speech and `0.0` otherwise.
pub trait SpeechClassifier: Send {
    fn confidence(&mut self, frame: &AudioFrame) -> f64;
    fn reset(&mut self) {}
    fn name(&self) -> &'static str {
        "unknown_classifier"
    }
}

/// The secondary classifier capability. `Absent` means volume-only detection.
pub enum SecondaryClassifier {
    Absent,
    Present(Box<dyn SpeechClassifier>),
}

impl std::fmt::Debug for SecondaryClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecondaryClassifier::Absent => f.write_str("Absent"),
            SecondaryClassifier::Present(classifier) => {
                f.debug_tuple("Present").field(&classifier.name()).finish()
            }
        }
    }
}

impl SecondaryClassifier {
    /// Build the configured classifier. A disabled classifier or a zero
    /// weight both yield `Absent`.
    pub fn from_config(cfg: &VadConfig) -> Self {
        if !cfg.enable_secondary_classifier || cfg.secondary_classifier_weight <= 0.0 {
            return SecondaryClassifier::Absent;
        }
        match cfg.classifier_kind {
            ClassifierKind::EnergyPattern => {
                SecondaryClassifier::Present(Box::new(EnergyPatternClassifier::from_config(cfg)))
            }
            ClassifierKind::Earshot => earshot_classifier(cfg),
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, SecondaryClassifier::Present(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            SecondaryClassifier::Absent => "none",
            SecondaryClassifier::Present(classifier) => classifier.name(),
        }
    }

    /// Classifier confidence for the frame, or `None` when absent.
    pub fn evaluate(&mut self, frame: &AudioFrame) -> Option<f64> {
        match self {
            SecondaryClassifier::Absent => None,
            SecondaryClassifier::Present(classifier) => {
                Some(classifier.confidence(frame).clamp(0.0, 1.0))
            }
        }
    }

    pub fn reset(&mut self) {
        if let SecondaryClassifier::Present(classifier) = self {
            classifier.reset();
        }
    }
}

#[cfg(feature = "vad_earshot")]
fn earshot_classifier(cfg: &VadConfig) -> SecondaryClassifier {
    SecondaryClassifier::Present(Box::new(crate::vad_earshot::EarshotClassifier::from_config(
        cfg,
    )))
}

#[cfg(not(feature = "vad_earshot"))]
fn earshot_classifier(cfg: &VadConfig) -> SecondaryClassifier {
    crate::log_debug("earshot classifier not compiled in; using energy pattern classifier");
    SecondaryClassifier::Present(Box::new(EnergyPatternClassifier::from_config(cfg)))
}

/// Calls a frame speech when it is loud enough and not hiss-like.
///
/// Broadband noise crosses zero far more often than voiced speech, so a high
/// zero-crossing rate vetoes an otherwise loud frame.
#[derive(Debug, Clone)]
pub struct EnergyPatternClassifier {
    min_energy: f64,
    max_zero_crossing_rate: f64,
}

impl EnergyPatternClassifier {
    pub fn new(min_energy: f64, max_zero_crossing_rate: f64) -> Self {
        Self {
            min_energy,
            max_zero_crossing_rate,
        }
    }

    pub fn from_config(cfg: &VadConfig) -> Self {
        Self::new(cfg.min_audio_energy, cfg.max_zero_crossing_rate)
    }
}

impl SpeechClassifier for EnergyPatternClassifier {
    fn confidence(&mut self, frame: &AudioFrame) -> f64 {
        if frame.is_empty() {
            return 0.0;
        }
        let speech = frame.rms() >= self.min_energy
            && zero_crossing_rate(frame.samples()) <= self.max_zero_crossing_rate;
        if speech {
            SPEECH_CONFIDENCE
        } else {
            0.0
        }
    }

    fn name(&self) -> &'static str {
        "energy_pattern"
    }
}

/// Fraction of adjacent sample pairs whose sign differs.
pub(crate) fn zero_crossing_rate(samples: &[i16]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] >= 0) != (pair[1] >= 0))
        .count();
    crossings as f64 / (samples.len() - 1) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alternating(level: i16, len: usize) -> AudioFrame {
        AudioFrame::new(
            (0..len)
                .map(|i| if i % 2 == 0 { level } else { -level })
                .collect(),
        )
    }

    /// Slow square wave: loud, but only crosses zero every `period` samples.
    fn square(level: i16, period: usize, len: usize) -> AudioFrame {
        AudioFrame::new(
            (0..len)
                .map(|i| if (i / period) % 2 == 0 { level } else { -level })
                .collect(),
        )
    }

    #[test]
    fn zero_crossing_rate_bounds() {
        assert_eq!(zero_crossing_rate(&[]), 0.0);
        assert_eq!(zero_crossing_rate(&[5; 64]), 0.0);
        assert_eq!(zero_crossing_rate(alternating(5, 64).samples()), 1.0);
    }

    #[test]
    fn energy_pattern_accepts_loud_voiced_frame() {
        let mut classifier = EnergyPatternClassifier::new(100.0, 0.3);
        assert_eq!(classifier.confidence(&square(500, 32, 1024)), SPEECH_CONFIDENCE);
    }

    #[test]
    fn energy_pattern_rejects_quiet_frame() {
        let mut classifier = EnergyPatternClassifier::new(100.0, 0.3);
        assert_eq!(classifier.confidence(&square(50, 32, 1024)), 0.0);
    }

    #[test]
    fn energy_pattern_rejects_hiss() {
        let mut classifier = EnergyPatternClassifier::new(100.0, 0.3);
        assert_eq!(classifier.confidence(&alternating(500, 1024)), 0.0);
    }

    #[test]
    fn disabled_or_weightless_classifier_is_absent() {
        let cfg = VadConfig {
            enable_secondary_classifier: false,
            ..VadConfig::default()
        };
        assert!(!SecondaryClassifier::from_config(&cfg).is_present());

        let cfg = VadConfig {
            secondary_classifier_weight: 0.0,
            ..VadConfig::default()
        };
        let mut classifier = SecondaryClassifier::from_config(&cfg);
        assert!(!classifier.is_present());
        assert_eq!(classifier.evaluate(&AudioFrame::constant(500, 64)), None);
        assert_eq!(classifier.name(), "none");
    }

    #[test]
    fn energy_pattern_kind_builds_energy_classifier() {
        let cfg = VadConfig {
            classifier_kind: ClassifierKind::EnergyPattern,
            ..VadConfig::default()
        };
        let mut classifier = SecondaryClassifier::from_config(&cfg);
        assert_eq!(classifier.name(), "energy_pattern");
        assert_eq!(
            classifier.evaluate(&square(500, 32, 1024)),
            Some(SPEECH_CONFIDENCE)
        );
    }
}
