//! Ambient noise baseline learned from idle frames.

/// Learns a noise baseline from the first `sample_target` idle volumes and
/// derives the detection threshold from it exactly once.
///
/// Until the baseline is learned the threshold is the configured base value.
/// Further observations are ignored until [`NoiseFloorEstimator::reset`].
#[derive(Debug, Clone)]
pub struct NoiseFloorEstimator {
    samples: Vec<f64>,
    sample_target: usize,
    base_threshold: f64,
    multiplier: f64,
    baseline: Option<f64>,
    threshold: f64,
}

impl NoiseFloorEstimator {
    pub fn new(sample_target: usize, base_threshold: f64, multiplier: f64) -> Self {
        let sample_target = sample_target.max(1);
        Self {
            samples: Vec::with_capacity(sample_target),
            sample_target,
            base_threshold,
            multiplier,
            baseline: None,
            threshold: base_threshold,
        }
    }

    /// Record one idle-frame volume. Returns true on the call that learned
    /// the baseline.
    pub fn observe(&mut self, volume: f64) -> bool {
        if self.baseline.is_some() {
            return false;
        }
        self.samples.push(volume);
        if self.samples.len() < self.sample_target {
            return false;
        }
        let baseline = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        self.baseline = Some(baseline);
        self.threshold = self.base_threshold.max(baseline * self.multiplier);
        self.samples = Vec::new();
        true
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    pub fn is_calibrated(&self) -> bool {
        self.baseline.is_some()
    }

    /// Samples gathered toward the next baseline.
    pub fn pending_samples(&self) -> usize {
        self.samples.len()
    }

    /// Forget the baseline and return to the base threshold.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.baseline = None;
        self.threshold = self.base_threshold;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_is_base_until_calibrated() {
        let mut estimator = NoiseFloorEstimator::new(3, 35.0, 3.5);
        assert!(!estimator.observe(20.0));
        assert!(!estimator.observe(20.0));
        assert_eq!(estimator.threshold(), 35.0);
        assert!(!estimator.is_calibrated());
    }

    #[test]
    fn baseline_learned_on_kth_sample() {
        let mut estimator = NoiseFloorEstimator::new(3, 35.0, 3.5);
        estimator.observe(10.0);
        estimator.observe(20.0);
        assert!(estimator.observe(30.0));
        assert_eq!(estimator.baseline(), Some(20.0));
        assert_eq!(estimator.threshold(), 70.0);
    }

    #[test]
    fn quiet_room_keeps_base_threshold() {
        let mut estimator = NoiseFloorEstimator::new(2, 35.0, 3.5);
        estimator.observe(2.0);
        estimator.observe(2.0);
        assert_eq!(estimator.threshold(), 35.0);
        assert_eq!(estimator.baseline(), Some(2.0));
    }

    #[test]
    fn observations_after_calibration_are_ignored() {
        let mut estimator = NoiseFloorEstimator::new(2, 35.0, 3.5);
        estimator.observe(20.0);
        estimator.observe(20.0);
        let threshold = estimator.threshold();
        for _ in 0..50 {
            assert!(!estimator.observe(5_000.0));
        }
        assert_eq!(estimator.threshold(), threshold);
        assert_eq!(estimator.baseline(), Some(20.0));
        assert_eq!(estimator.pending_samples(), 0);
    }

    #[test]
    fn reset_allows_a_new_baseline() {
        let mut estimator = NoiseFloorEstimator::new(1, 35.0, 3.5);
        estimator.observe(20.0);
        estimator.reset();
        assert_eq!(estimator.threshold(), 35.0);
        estimator.observe(40.0);
        assert_eq!(estimator.threshold(), 140.0);
    }
}
