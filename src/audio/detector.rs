//! Per-frame orchestration of the adaptive detector.

use super::classifier::SecondaryClassifier;
use super::confidence::ConfidenceScorer;
use super::frame::AudioFrame;
use super::noise::NoiseFloorEstimator;
use super::vad::{EndReason, Transition, VadState, VadStateMachine};
use super::volume::VolumeTracker;
use crate::config::VadConfig;
use crate::error::RecorderResult;
use crate::log_debug;
use serde::Serialize;
use std::time::Duration;

/// Signals behind one frame's decision, surfaced through recorder status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VadDebugInfo {
    pub volume: f64,
    pub secondary_confidence: Option<f64>,
    pub threshold: f64,
    pub noise_baseline: Option<f64>,
    pub speech_frames: u32,
    pub silence_frames: u32,
    pub confidence: f64,
}

/// Everything the recorder needs from one `detect` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadOutcome {
    /// True while the detector is inside an utterance.
    pub is_speech: bool,
    /// This frame's own classification, before state smoothing.
    pub is_speech_frame: bool,
    pub confidence: f64,
    pub state: VadState,
    pub transition: Option<Transition>,
    pub speech_duration: Duration,
    pub debug: VadDebugInfo,
}

impl VadOutcome {
    pub fn state_changed(&self) -> bool {
        self.transition.is_some()
    }
}

/// Volume tracking, noise adaptation, classifier fusion, and the state
/// machine, run in order for every frame.
#[derive(Debug)]
pub struct AdaptiveVad {
    volume: VolumeTracker,
    noise: NoiseFloorEstimator,
    classifier: SecondaryClassifier,
    scorer: ConfidenceScorer,
    machine: VadStateMachine,
    adapt_noise: bool,
    debug: bool,
}

impl AdaptiveVad {
    /// Validate `cfg` and build the configured classifier.
    pub fn new(cfg: &VadConfig) -> RecorderResult<Self> {
        cfg.validate()?;
        Ok(Self::with_classifier(cfg, SecondaryClassifier::from_config(cfg)))
    }

    /// Build around an injected classifier. `cfg` is assumed valid.
    pub fn with_classifier(cfg: &VadConfig, classifier: SecondaryClassifier) -> Self {
        Self {
            volume: VolumeTracker::new(cfg.volume_history_capacity, cfg.volume_drop_threshold),
            noise: NoiseFloorEstimator::new(
                cfg.noise_adaptation_frame_count,
                cfg.base_volume_threshold,
                cfg.noise_multiplier,
            ),
            classifier,
            scorer: ConfidenceScorer::new(cfg.secondary_classifier_weight, cfg.volume_weight),
            machine: VadStateMachine::new(cfg),
            adapt_noise: cfg.enable_noise_adaptation,
            debug: cfg.debug,
        }
    }

    pub fn state(&self) -> VadState {
        self.machine.state()
    }

    pub fn threshold(&self) -> f64 {
        self.noise.threshold()
    }

    pub fn noise_baseline(&self) -> Option<f64> {
        self.noise.baseline()
    }

    pub fn classifier_name(&self) -> &'static str {
        self.classifier.name()
    }

    /// Process one frame captured at stream time `at`.
    pub fn detect(&mut self, frame: &AudioFrame, at: Duration) -> VadOutcome {
        let volume = self.volume.observe(frame);
        if self.adapt_noise && self.machine.state() == VadState::Idle && self.noise.observe(volume)
        {
            let baseline = self.noise.baseline().unwrap_or_default();
            let threshold = self.noise.threshold();
            log_debug(&format!(
                "noise baseline learned: baseline={baseline:.1} threshold={threshold:.1}"
            ));
            tracing::info!(baseline, threshold, "noise_baseline_learned");
        }

        let secondary = self.classifier.evaluate(frame);
        let threshold = self.noise.threshold();
        let confidence = self
            .scorer
            .score(volume, secondary, threshold, self.machine.state());
        self.advance(volume, secondary, confidence, at)
    }

    /// Advance one tick for a frame the source failed to deliver.
    ///
    /// The tick counts as silence for the state machine. Volume history,
    /// noise learning and the classifier never see it.
    pub fn detect_gap(&mut self, at: Duration) -> VadOutcome {
        self.advance(0.0, None, 0.0, at)
    }

    fn advance(
        &mut self,
        volume: f64,
        secondary: Option<f64>,
        confidence: f64,
        at: Duration,
    ) -> VadOutcome {
        let threshold = self.noise.threshold();
        let step = self.machine.step(confidence, at, &self.volume);
        let state = self.machine.state();

        let debug = VadDebugInfo {
            volume,
            secondary_confidence: secondary,
            threshold,
            noise_baseline: self.noise.baseline(),
            speech_frames: self.machine.speech_frames(),
            silence_frames: self.machine.silence_frames(),
            confidence,
        };
        if self.debug {
            log_debug(&format!(
                "vad frame: t={}ms state={} volume={volume:.1} threshold={threshold:.1} conf={confidence:.3} speech={} silence={}",
                at.as_millis(),
                state.label(),
                debug.speech_frames,
                debug.silence_frames,
            ));
        }
        if let Some(transition) = step.transition {
            log_transition(transition, confidence);
        }

        let speech_duration = match step.transition {
            Some(Transition::SpeechEnded { duration, .. }) => duration,
            _ => self.machine.speech_duration(at),
        };
        VadOutcome {
            is_speech: state == VadState::Speaking,
            is_speech_frame: step.is_speech_frame,
            confidence,
            state,
            transition: step.transition,
            speech_duration,
            debug,
        }
    }

    /// End an in-progress utterance from outside the detector.
    pub fn force_end(&mut self, reason: EndReason, at: Duration) -> Option<Transition> {
        let transition = self.machine.force_end(reason, at);
        if let Some(transition) = transition {
            log_transition(transition, 0.0);
        }
        transition
    }

    /// Return to Idle and forget the noise baseline and volume history.
    pub fn reset(&mut self) {
        self.machine.reset();
        self.noise.reset();
        self.classifier.reset();
        self.volume.clear();
    }
}

fn log_transition(transition: Transition, confidence: f64) {
    match transition {
        Transition::SpeechStarted => {
            log_debug(&format!("speech started (confidence {confidence:.2})"));
            tracing::info!(confidence, "speech_started");
        }
        Transition::SpeechEnded { reason, duration } => {
            let duration_ms = duration.as_millis() as u64;
            log_debug(&format!(
                "speech ended: reason={} duration_ms={duration_ms}",
                reason.label()
            ));
            tracing::info!(reason = reason.label(), duration_ms, "speech_ended");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume_only() -> VadConfig {
        VadConfig {
            enable_secondary_classifier: false,
            enable_noise_adaptation: false,
            volume_drop_threshold: 1.0,
            ..VadConfig::default()
        }
    }

    fn run(vad: &mut AdaptiveVad, level: i16, frames: usize, clock: &mut u32) -> Vec<VadOutcome> {
        let frame_len = Duration::from_millis(64);
        (0..frames)
            .map(|_| {
                *clock += 1;
                vad.detect(&AudioFrame::constant(level, 1024), frame_len * *clock)
            })
            .collect()
    }

    #[test]
    fn new_rejects_invalid_config() {
        let cfg = VadConfig {
            base_volume_threshold: 0.0,
            ..volume_only()
        };
        assert!(AdaptiveVad::new(&cfg).is_err());
    }

    #[test]
    fn pure_silence_never_leaves_idle() {
        let mut vad = AdaptiveVad::new(&volume_only()).expect("valid config");
        let mut clock = 0;
        for outcome in run(&mut vad, 30, 200, &mut clock) {
            assert_eq!(outcome.state, VadState::Idle);
            assert!(!outcome.state_changed());
        }
    }

    #[test]
    fn loud_run_starts_speech_on_confirmation_frame() {
        let mut vad = AdaptiveVad::new(&volume_only()).expect("valid config");
        let mut clock = 0;
        let outcomes = run(&mut vad, 100, 4, &mut clock);
        assert!(outcomes[..3].iter().all(|o| !o.state_changed()));
        assert_eq!(outcomes[3].transition, Some(Transition::SpeechStarted));
        assert!(outcomes[3].is_speech);
        assert!((outcomes[3].debug.volume - 100.0).abs() < 1e-9);
        assert_eq!(outcomes[3].debug.secondary_confidence, None);
    }

    #[test]
    fn noise_baseline_raises_threshold_once() {
        let cfg = VadConfig {
            enable_noise_adaptation: true,
            noise_adaptation_frame_count: 10,
            ..volume_only()
        };
        let mut vad = AdaptiveVad::new(&cfg).expect("valid config");
        let mut clock = 0;
        run(&mut vad, 20, 9, &mut clock);
        assert_eq!(vad.threshold(), 35.0);
        run(&mut vad, 20, 1, &mut clock);
        assert_eq!(vad.noise_baseline(), Some(20.0));
        assert_eq!(vad.threshold(), 70.0);

        // Louder idle input after calibration leaves the threshold alone.
        run(&mut vad, 60, 50, &mut clock);
        assert_eq!(vad.threshold(), 70.0);
        assert_eq!(vad.state(), VadState::Idle);
    }

    #[test]
    fn noise_is_not_learned_while_speaking() {
        let cfg = VadConfig {
            enable_noise_adaptation: true,
            noise_adaptation_frame_count: 5,
            ..volume_only()
        };
        let mut vad = AdaptiveVad::new(&cfg).expect("valid config");
        let mut clock = 0;
        run(&mut vad, 100, 4, &mut clock);
        assert_eq!(vad.state(), VadState::Speaking);
        run(&mut vad, 100, 10, &mut clock);
        // Only the first three idle frames were sampled.
        assert_eq!(vad.noise_baseline(), None);
    }

    #[test]
    fn read_gap_counts_as_silence_without_feeding_noise_learning() {
        let cfg = VadConfig {
            enable_noise_adaptation: true,
            noise_adaptation_frame_count: 4,
            ..volume_only()
        };
        let mut vad = AdaptiveVad::new(&cfg).expect("valid config");
        let mut clock = 0;
        run(&mut vad, 20, 3, &mut clock);
        clock += 1;
        let gap = vad.detect_gap(Duration::from_millis(64) * clock);
        assert!(!gap.is_speech_frame);
        assert_eq!(gap.debug.silence_frames, 4);
        assert_eq!(vad.noise_baseline(), None);

        run(&mut vad, 20, 1, &mut clock);
        assert_eq!(vad.noise_baseline(), Some(20.0));
        assert_eq!(vad.threshold(), 70.0);
    }

    #[test]
    fn read_gap_mid_utterance_does_not_touch_volume_history() {
        let mut vad = AdaptiveVad::new(&volume_only()).expect("valid config");
        let mut clock = 0;
        run(&mut vad, 100, 6, &mut clock);
        clock += 1;
        let gap = vad.detect_gap(Duration::from_millis(64) * clock);
        assert_eq!(gap.state, VadState::Speaking);
        assert_eq!(gap.debug.speech_frames, 0);
        assert_eq!(vad.volume.history_len(), 6);
        assert_eq!(vad.volume.latest(), Some(100.0));
    }

    #[test]
    fn reset_returns_to_idle_and_forgets_baseline() {
        let cfg = VadConfig {
            enable_noise_adaptation: true,
            noise_adaptation_frame_count: 2,
            ..volume_only()
        };
        let mut vad = AdaptiveVad::new(&cfg).expect("valid config");
        let mut clock = 0;
        run(&mut vad, 20, 2, &mut clock);
        assert!(vad.noise_baseline().is_some());
        run(&mut vad, 500, 4, &mut clock);
        assert_eq!(vad.state(), VadState::Speaking);
        vad.reset();
        assert_eq!(vad.state(), VadState::Idle);
        assert_eq!(vad.noise_baseline(), None);
        assert_eq!(vad.threshold(), 35.0);
    }

    #[test]
    fn injected_classifier_is_fused() {
        let cfg = VadConfig {
            enable_secondary_classifier: true,
            classifier_kind: crate::config::ClassifierKind::EnergyPattern,
            ..volume_only()
        };
        let mut vad = AdaptiveVad::new(&cfg).expect("valid config");
        assert_eq!(vad.classifier_name(), "energy_pattern");
        let mut clock = 0;
        let outcome = run(&mut vad, 100, 1, &mut clock)[0];
        assert_eq!(outcome.debug.secondary_confidence, Some(0.8));
        let expected = 0.6 * 0.8 + 0.4 * (65.0 / 70.0);
        assert!((outcome.confidence - expected).abs() < 1e-9);
    }
}
