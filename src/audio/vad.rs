//! Utterance state machine driven by per-frame confidence.
//!
//! `Idle -> Detecting -> Speaking -> Idle`, restarting automatically. Only the
//! two edges the recorder acts on (speech start and speech end) are reported
//! as transitions.

use super::pause::PauseDetector;
use super::volume::VolumeTracker;
use crate::config::VadConfig;
use serde::Serialize;
use std::time::Duration;

/// Silent frames a Detecting candidate may absorb before it is dropped.
const DETECTING_SILENCE_TOLERANCE: u32 = 5;
/// Silence credit handed back when an utterance is still too short to end.
const SHORT_SPEECH_SILENCE_BACKOFF: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VadState {
    Idle,
    Detecting,
    Speaking,
}

impl VadState {
    pub fn label(self) -> &'static str {
        match self {
            VadState::Idle => "idle",
            VadState::Detecting => "detecting",
            VadState::Speaking => "speaking",
        }
    }
}

/// Why an utterance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The detector's own speech-duration cap.
    MaxDuration,
    /// An in-utterance pause reached the pause tolerance.
    Pause,
    /// Consecutive silent frames reached the silence limit.
    SilenceFrames,
    /// Recent volume fell sharply against the preceding window.
    VolumeDrop,
    /// The recorder's own recording-duration cap.
    RecorderSafetyNet,
}

impl EndReason {
    pub fn label(self) -> &'static str {
        match self {
            EndReason::MaxDuration => "max_duration",
            EndReason::Pause => "pause",
            EndReason::SilenceFrames => "silence_frames",
            EndReason::VolumeDrop => "volume_drop",
            EndReason::RecorderSafetyNet => "recorder_safety_net",
        }
    }

    /// True for the two duration caps, which surface as timeouts.
    pub fn is_timeout(self) -> bool {
        matches!(self, EndReason::MaxDuration | EndReason::RecorderSafetyNet)
    }
}

/// Externally observable state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    SpeechStarted,
    SpeechEnded {
        reason: EndReason,
        duration: Duration,
    },
}

/// Result of one state-machine step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    pub is_speech_frame: bool,
    pub transition: Option<Transition>,
}

impl Step {
    pub fn state_changed(&self) -> bool {
        self.transition.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct VadStateMachine {
    state: VadState,
    speech_frames: u32,
    silence_frames: u32,
    speech_started: Option<Duration>,
    pause: PauseDetector,
    confidence_threshold: f64,
    detection_frames: u32,
    confirmation_frames: u32,
    silence_frames_limit: u32,
    min_speech_duration: Duration,
    max_speech_duration: Duration,
}

impl VadStateMachine {
    pub fn new(cfg: &VadConfig) -> Self {
        Self {
            state: VadState::Idle,
            speech_frames: 0,
            silence_frames: 0,
            speech_started: None,
            pause: PauseDetector::new(cfg.pause_tolerance),
            confidence_threshold: cfg.confidence_threshold,
            detection_frames: cfg.detection_frames,
            confirmation_frames: cfg.confirmation_frames,
            silence_frames_limit: cfg.silence_frames_limit,
            min_speech_duration: cfg.min_speech_duration,
            max_speech_duration: cfg.max_speech_duration,
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    pub fn speech_frames(&self) -> u32 {
        self.speech_frames
    }

    pub fn silence_frames(&self) -> u32 {
        self.silence_frames
    }

    /// Time spent in Speaking as of `now`; zero outside an utterance.
    pub fn speech_duration(&self, now: Duration) -> Duration {
        self.speech_started
            .map(|started| now.saturating_sub(started))
            .unwrap_or_default()
    }

    /// Advance by one frame with confidence `confidence` observed at stream
    /// time `at`. The volume tracker is consulted for drops while speaking.
    pub fn step(&mut self, confidence: f64, at: Duration, volume: &VolumeTracker) -> Step {
        let is_speech_frame = confidence > self.confidence_threshold;
        if is_speech_frame {
            self.speech_frames = self.speech_frames.saturating_add(1);
            self.silence_frames = 0;
        } else {
            self.speech_frames = 0;
            self.silence_frames = self.silence_frames.saturating_add(1);
        }

        let transition = match self.state {
            VadState::Idle => {
                if self.speech_frames >= self.detection_frames {
                    self.state = VadState::Detecting;
                }
                None
            }
            VadState::Detecting => {
                if self.speech_frames >= self.confirmation_frames {
                    self.state = VadState::Speaking;
                    self.speech_started = Some(at);
                    self.pause.reset();
                    Some(Transition::SpeechStarted)
                } else {
                    if self.silence_frames > DETECTING_SILENCE_TOLERANCE {
                        self.state = VadState::Idle;
                    }
                    None
                }
            }
            VadState::Speaking => self.step_speaking(is_speech_frame, at, volume),
        };

        Step {
            is_speech_frame,
            transition,
        }
    }

    fn step_speaking(
        &mut self,
        is_speech_frame: bool,
        at: Duration,
        volume: &VolumeTracker,
    ) -> Option<Transition> {
        let duration = self.speech_duration(at);
        if duration >= self.max_speech_duration {
            return Some(self.end(EndReason::MaxDuration, duration));
        }

        let pause = self.pause.update(is_speech_frame, at);
        let silence = self.silence_frames >= self.silence_frames_limit;
        let drop = volume.detect_drop();
        let reason = if pause {
            EndReason::Pause
        } else if drop {
            EndReason::VolumeDrop
        } else if silence {
            EndReason::SilenceFrames
        } else {
            return None;
        };

        if duration >= self.min_speech_duration {
            Some(self.end(reason, duration))
        } else {
            self.silence_frames = self
                .silence_frames
                .saturating_sub(SHORT_SPEECH_SILENCE_BACKOFF);
            None
        }
    }

    fn end(&mut self, reason: EndReason, duration: Duration) -> Transition {
        self.return_to_idle();
        Transition::SpeechEnded { reason, duration }
    }

    /// End the current utterance from outside (recorder safety net).
    /// Returns the transition when an utterance was actually in progress.
    pub fn force_end(&mut self, reason: EndReason, at: Duration) -> Option<Transition> {
        if self.state != VadState::Speaking {
            return None;
        }
        let duration = self.speech_duration(at);
        Some(self.end(reason, duration))
    }

    /// Every new utterance has to earn its own detection run.
    fn return_to_idle(&mut self) {
        self.state = VadState::Idle;
        self.speech_started = None;
        self.speech_frames = 0;
        self.silence_frames = 0;
        self.pause.reset();
    }

    pub fn reset(&mut self) {
        self.return_to_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(64);

    fn config() -> VadConfig {
        VadConfig {
            confidence_threshold: 0.25,
            detection_frames: 3,
            confirmation_frames: 4,
            silence_frames_limit: 15,
            min_speech_duration: Duration::from_secs(1),
            max_speech_duration: Duration::from_secs(20),
            volume_drop_threshold: 1.0,
            ..VadConfig::default()
        }
    }

    struct Harness {
        machine: VadStateMachine,
        volume: VolumeTracker,
        frames: u32,
    }

    impl Harness {
        fn new(cfg: &VadConfig) -> Self {
            Self {
                machine: VadStateMachine::new(cfg),
                volume: VolumeTracker::new(cfg.volume_history_capacity, cfg.volume_drop_threshold),
                frames: 0,
            }
        }

        fn feed(&mut self, confidence: f64) -> Step {
            self.frames += 1;
            self.volume.push(confidence * 100.0);
            self.machine
                .step(confidence, FRAME * self.frames, &self.volume)
        }
    }

    #[test]
    fn idle_to_detecting_is_not_a_transition() {
        let mut h = Harness::new(&config());
        for _ in 0..3 {
            assert!(!h.feed(0.9).state_changed());
        }
        assert_eq!(h.machine.state(), VadState::Detecting);
        let step = h.feed(0.9);
        assert_eq!(step.transition, Some(Transition::SpeechStarted));
        assert_eq!(h.machine.state(), VadState::Speaking);
    }

    #[test]
    fn confidence_must_exceed_threshold() {
        let mut h = Harness::new(&config());
        for _ in 0..10 {
            let step = h.feed(0.25);
            assert!(!step.is_speech_frame);
        }
        assert_eq!(h.machine.state(), VadState::Idle);
    }

    #[test]
    fn detecting_falls_back_after_six_silent_frames() {
        let mut h = Harness::new(&config());
        for _ in 0..3 {
            h.feed(0.9);
        }
        for _ in 0..5 {
            h.feed(0.0);
        }
        assert_eq!(h.machine.state(), VadState::Detecting);
        h.feed(0.0);
        assert_eq!(h.machine.state(), VadState::Idle);
    }

    #[test]
    fn silence_interrupting_detection_restarts_the_count() {
        let mut h = Harness::new(&config());
        for _ in 0..3 {
            h.feed(0.9);
        }
        h.feed(0.0);
        for _ in 0..3 {
            assert!(!h.feed(0.9).state_changed());
        }
        assert!(h.feed(0.9).state_changed());
    }

    #[test]
    fn silence_limit_ends_utterance_after_min_duration() {
        let mut h = Harness::new(&config());
        for _ in 0..34 {
            h.feed(0.9);
        }
        for index in 1..=14 {
            assert!(!h.feed(0.0).state_changed(), "ended early at {index}");
        }
        let step = h.feed(0.0);
        match step.transition {
            Some(Transition::SpeechEnded { reason, duration }) => {
                assert_eq!(reason, EndReason::SilenceFrames);
                assert_eq!(duration, FRAME * 45);
            }
            other => panic!("expected speech end, got {other:?}"),
        }
        assert_eq!(h.machine.state(), VadState::Idle);
    }

    #[test]
    fn short_utterance_backs_off_silence_counter() {
        let cfg = VadConfig {
            silence_frames_limit: 4,
            min_speech_duration: Duration::from_secs(2),
            ..config()
        };
        let mut h = Harness::new(&cfg);
        for _ in 0..4 {
            h.feed(0.9);
        }
        for _ in 0..3 {
            h.feed(0.0);
        }
        assert_eq!(h.machine.silence_frames(), 3);
        assert!(!h.feed(0.0).state_changed());
        assert_eq!(h.machine.silence_frames(), 1);
        assert_eq!(h.machine.state(), VadState::Speaking);
    }

    #[test]
    fn short_utterance_ends_once_duration_catches_up() {
        let cfg = VadConfig {
            silence_frames_limit: 4,
            min_speech_duration: Duration::from_secs(1),
            pause_tolerance: Duration::from_secs(60),
            ..config()
        };
        let mut h = Harness::new(&cfg);
        for _ in 0..4 {
            h.feed(0.9);
        }
        let mut ended_after = None;
        for index in 1..=40 {
            if h.feed(0.0).state_changed() {
                ended_after = Some(index);
                break;
            }
        }
        // Speaking started at frame 4; one second is 15.625 frames later.
        let index = ended_after.expect("utterance should end");
        assert!(FRAME * index >= Duration::from_secs(1));
        assert!(FRAME * (index - 1) < Duration::from_secs(1) + FRAME);
    }

    #[test]
    fn max_duration_ignores_min_duration_floor() {
        let cfg = VadConfig {
            min_speech_duration: Duration::from_secs(1),
            max_speech_duration: Duration::from_secs(1),
            ..config()
        };
        let mut h = Harness::new(&cfg);
        let mut reason = None;
        for _ in 0..40 {
            if let Some(Transition::SpeechEnded { reason: r, .. }) = h.feed(0.9).transition {
                reason = Some(r);
                break;
            }
        }
        assert_eq!(reason, Some(EndReason::MaxDuration));
    }

    #[test]
    fn speech_after_max_duration_needs_a_fresh_confirmation_run() {
        let cfg = VadConfig {
            min_speech_duration: Duration::from_millis(500),
            max_speech_duration: Duration::from_secs(1),
            ..config()
        };
        let mut h = Harness::new(&cfg);
        let mut ended = false;
        for _ in 0..40 {
            if h.feed(0.9).state_changed() && h.machine.state() == VadState::Idle {
                ended = true;
                break;
            }
        }
        assert!(ended);
        assert_eq!(h.machine.speech_frames(), 0);

        for _ in 0..2 {
            assert!(!h.feed(0.9).state_changed());
            assert_eq!(h.machine.state(), VadState::Idle);
        }
        assert!(!h.feed(0.9).state_changed());
        assert_eq!(h.machine.state(), VadState::Detecting);
        assert_eq!(h.feed(0.9).transition, Some(Transition::SpeechStarted));
    }

    #[test]
    fn pause_reason_wins_over_silence() {
        let cfg = VadConfig {
            silence_frames_limit: 30,
            pause_tolerance: Duration::from_millis(640),
            ..config()
        };
        let mut h = Harness::new(&cfg);
        for _ in 0..24 {
            h.feed(0.9);
        }
        let mut reason = None;
        for _ in 0..20 {
            if let Some(Transition::SpeechEnded { reason: r, .. }) = h.feed(0.0).transition {
                reason = Some(r);
                break;
            }
        }
        assert_eq!(reason, Some(EndReason::Pause));
    }

    #[test]
    fn force_end_only_applies_while_speaking() {
        let mut h = Harness::new(&config());
        assert!(h
            .machine
            .force_end(EndReason::RecorderSafetyNet, FRAME)
            .is_none());
        for _ in 0..4 {
            h.feed(0.9);
        }
        let transition = h.machine.force_end(EndReason::RecorderSafetyNet, FRAME * 10);
        assert_eq!(
            transition,
            Some(Transition::SpeechEnded {
                reason: EndReason::RecorderSafetyNet,
                duration: FRAME * 6,
            })
        );
        assert_eq!(h.machine.state(), VadState::Idle);
    }

    #[test]
    fn end_reason_labels_and_timeouts() {
        assert_eq!(EndReason::VolumeDrop.label(), "volume_drop");
        assert!(EndReason::MaxDuration.is_timeout());
        assert!(EndReason::RecorderSafetyNet.is_timeout());
        assert!(!EndReason::Pause.is_timeout());
    }
}
