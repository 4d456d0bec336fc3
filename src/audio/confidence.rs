use super::vad::VadState;

/// Share of the secondary weight kept when volume alone says silence outside
/// an active utterance.
const SILENT_SECONDARY_WEIGHT_FACTOR: f64 = 0.05;

/// Fuses volume confidence with the optional secondary classifier confidence.
///
/// The fusion is asymmetric: during an utterance a silent frame stays silent
/// whatever the classifier says, and outside one the classifier can barely
/// lift a silent frame.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceScorer {
    secondary_weight: f64,
    volume_weight: f64,
}

impl ConfidenceScorer {
    pub fn new(secondary_weight: f64, volume_weight: f64) -> Self {
        Self {
            secondary_weight,
            volume_weight,
        }
    }

    /// Per-frame confidence in `[0, 1]`. `secondary` is `None` when no
    /// classifier is present.
    pub fn score(&self, volume: f64, secondary: Option<f64>, threshold: f64, state: VadState) -> f64 {
        let volume_conf = volume_confidence(volume, threshold);
        let secondary = match secondary {
            Some(value) if self.secondary_weight > 0.0 => value,
            _ => return volume_conf,
        };

        let confidence = if volume_conf == 0.0 {
            if state == VadState::Speaking {
                return volume_conf;
            }
            let secondary_weight = self.secondary_weight * SILENT_SECONDARY_WEIGHT_FACTOR;
            let volume_weight = 1.0 - secondary_weight;
            secondary_weight * secondary + volume_weight * volume_conf
        } else {
            self.secondary_weight * secondary + self.volume_weight * volume_conf
        };
        confidence.clamp(0.0, 1.0)
    }
}

/// 0 below the threshold, rising linearly to 1 at three times the threshold.
pub fn volume_confidence(volume: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 || volume < threshold {
        return 0.0;
    }
    ((volume - threshold) / (threshold * 2.0)).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn volume_confidence_curve() {
        assert_eq!(volume_confidence(20.0, 35.0), 0.0);
        assert_eq!(volume_confidence(35.0, 35.0), 0.0);
        assert!((volume_confidence(70.0, 35.0) - 0.5).abs() < EPS);
        assert_eq!(volume_confidence(105.0, 35.0), 1.0);
        assert_eq!(volume_confidence(10_000.0, 35.0), 1.0);
    }

    #[test]
    fn volume_only_without_classifier() {
        let scorer = ConfidenceScorer::new(0.6, 0.4);
        let conf = scorer.score(70.0, None, 35.0, VadState::Idle);
        assert!((conf - 0.5).abs() < EPS);
    }

    #[test]
    fn zero_secondary_weight_acts_as_absent() {
        let scorer = ConfidenceScorer::new(0.0, 0.4);
        let conf = scorer.score(70.0, Some(0.8), 35.0, VadState::Idle);
        assert!((conf - 0.5).abs() < EPS);
    }

    #[test]
    fn silence_while_speaking_ignores_classifier() {
        let scorer = ConfidenceScorer::new(0.6, 0.4);
        assert_eq!(scorer.score(0.0, Some(0.8), 35.0, VadState::Speaking), 0.0);
    }

    #[test]
    fn silence_while_idle_damps_classifier() {
        let scorer = ConfidenceScorer::new(0.6, 0.4);
        let conf = scorer.score(0.0, Some(0.8), 35.0, VadState::Idle);
        assert!((conf - 0.6 * 0.05 * 0.8).abs() < EPS);
        let conf = scorer.score(0.0, Some(0.8), 35.0, VadState::Detecting);
        assert!(conf < 0.25);
    }

    #[test]
    fn audible_frame_uses_weighted_sum() {
        let scorer = ConfidenceScorer::new(0.6, 0.4);
        let conf = scorer.score(70.0, Some(0.8), 35.0, VadState::Speaking);
        assert!((conf - (0.6 * 0.8 + 0.4 * 0.5)).abs() < EPS);
    }

    #[test]
    fn weighted_sum_is_clamped() {
        let scorer = ConfidenceScorer::new(1.0, 1.0);
        assert_eq!(scorer.score(1_000.0, Some(1.0), 35.0, VadState::Idle), 1.0);
    }
}
