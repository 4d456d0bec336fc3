//! Utterance segmentation on top of detector outcomes.
//!
//! Collects frames between speech start and speech end. The consecutive
//! speech run that confirmed the start opens the utterance. Silent frames
//! inside an utterance are held back until speech resumes, so an utterance
//! that ends on silence carries no trailing silence.

use super::detector::VadOutcome;
use super::frame::{AudioFrame, FrameFormat};
use super::sink::Utterance;
use super::vad::{EndReason, Transition};
use crate::config::VadConfig;
use crate::log_debug;
use serde::Serialize;
use std::collections::VecDeque;
use std::time::Duration;

/// Utterances shorter than this are flagged as suspect.
const MIN_PLAUSIBLE_UTTERANCE: Duration = Duration::from_millis(500);

/// Per-utterance numbers for logs, events, and quality checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtteranceMetrics {
    pub frames: usize,
    pub audio_ms: u64,
    pub speech_ms: u64,
    pub discarded_tail_frames: usize,
    pub mean_rms: f64,
    pub end_reason: EndReason,
    pub suspect: bool,
}

/// A finished utterance ready for the sink.
#[derive(Debug, Clone)]
pub struct CompletedUtterance {
    pub utterance: Utterance,
    pub metrics: UtteranceMetrics,
}

#[derive(Debug, Clone)]
pub enum CaptureEvent {
    Started,
    Completed(CompletedUtterance),
}

/// Segments a continuous frame stream into utterances.
#[derive(Debug)]
pub struct UtteranceCapture {
    format: FrameFormat,
    confirmation_frames: usize,
    base_threshold: f64,
    confirming: VecDeque<AudioFrame>,
    frames: Vec<AudioFrame>,
    pending_silence: Vec<AudioFrame>,
    started_at: Option<Duration>,
}

impl UtteranceCapture {
    pub fn new(cfg: &VadConfig) -> Self {
        let confirmation_frames = (cfg.confirmation_frames as usize).max(1);
        Self {
            format: FrameFormat::from_config(cfg),
            confirmation_frames,
            base_threshold: cfg.base_volume_threshold,
            confirming: VecDeque::with_capacity(confirmation_frames),
            frames: Vec::new(),
            pending_silence: Vec::new(),
            started_at: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.started_at.is_some()
    }

    /// Stream time since the utterance started, if one is open.
    pub fn elapsed(&self, now: Duration) -> Option<Duration> {
        self.started_at.map(|started| now.saturating_sub(started))
    }

    /// Frames committed to the open utterance so far.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Route one frame according to the detector's outcome for it.
    pub fn on_frame(
        &mut self,
        frame: AudioFrame,
        outcome: &VadOutcome,
        at: Duration,
    ) -> Option<CaptureEvent> {
        match outcome.transition {
            Some(Transition::SpeechStarted) => {
                self.track_confirming(frame);
                Some(self.open(at))
            }
            Some(Transition::SpeechEnded { reason, duration }) => {
                if outcome.is_speech_frame {
                    self.commit(frame);
                }
                self.finish(reason, duration).map(CaptureEvent::Completed)
            }
            None if self.is_recording() => {
                if outcome.is_speech_frame {
                    self.commit(frame);
                } else {
                    self.pending_silence.push(frame);
                }
                None
            }
            None => {
                if outcome.is_speech_frame {
                    self.track_confirming(frame);
                } else {
                    self.confirming.clear();
                }
                None
            }
        }
    }

    /// Route a tick whose frame never arrived. Nothing is appended, and a
    /// gap breaks the confirming run like silence does.
    pub fn on_gap(&mut self, outcome: &VadOutcome, at: Duration) -> Option<CaptureEvent> {
        match outcome.transition {
            Some(Transition::SpeechStarted) => Some(self.open(at)),
            Some(Transition::SpeechEnded { reason, duration }) => {
                self.finish(reason, duration).map(CaptureEvent::Completed)
            }
            None => {
                if !self.is_recording() {
                    self.confirming.clear();
                }
                None
            }
        }
    }

    /// Close the open utterance for a reason the detector did not decide.
    pub fn force_finish(
        &mut self,
        reason: EndReason,
        speech_duration: Duration,
    ) -> Option<CompletedUtterance> {
        if !self.is_recording() {
            return None;
        }
        self.finish(reason, speech_duration)
    }

    /// Drop any open utterance without producing it.
    pub fn discard(&mut self) -> usize {
        let dropped = self.frames.len() + self.pending_silence.len();
        self.frames.clear();
        self.pending_silence.clear();
        self.confirming.clear();
        self.started_at = None;
        dropped
    }

    fn open(&mut self, at: Duration) -> CaptureEvent {
        self.frames = self.confirming.drain(..).collect();
        self.pending_silence.clear();
        self.started_at = Some(at);
        CaptureEvent::Started
    }

    fn track_confirming(&mut self, frame: AudioFrame) {
        self.confirming.push_back(frame);
        while self.confirming.len() > self.confirmation_frames {
            self.confirming.pop_front();
        }
    }

    fn commit(&mut self, frame: AudioFrame) {
        self.frames.append(&mut self.pending_silence);
        self.frames.push(frame);
    }

    fn finish(&mut self, reason: EndReason, speech_duration: Duration) -> Option<CompletedUtterance> {
        let discarded_tail_frames = self.pending_silence.len();
        self.pending_silence.clear();
        self.confirming.clear();
        self.started_at = None;
        let frames = std::mem::take(&mut self.frames);
        let utterance = Utterance::new(frames, self.format);
        if utterance.is_empty() {
            log_debug("utterance ended with no frames; nothing to persist");
            return None;
        }

        let audio = utterance.duration();
        let mean_rms = utterance.mean_rms();
        let suspect = audio < MIN_PLAUSIBLE_UTTERANCE || mean_rms < self.base_threshold;
        let metrics = UtteranceMetrics {
            frames: utterance.frame_count(),
            audio_ms: audio.as_millis() as u64,
            speech_ms: speech_duration.as_millis() as u64,
            discarded_tail_frames,
            mean_rms,
            end_reason: reason,
            suspect,
        };
        if suspect {
            log_debug(&format!(
                "utterance looks suspect: audio_ms={} mean_rms={mean_rms:.1} (base threshold {:.1})",
                metrics.audio_ms, self.base_threshold
            ));
        }
        Some(CompletedUtterance { utterance, metrics })
    }
}

/// Emit a pipe-delimited metrics line for offline analysis.
///
/// Format: `utterance_metrics|frames=...|audio_ms=...|speech_ms=...|tail_dropped=...|mean_rms=...|end=...|suspect=...`
pub(crate) fn log_utterance_metrics(metrics: &UtteranceMetrics) {
    log_debug(&format!(
        "utterance_metrics|frames={}|audio_ms={}|speech_ms={}|tail_dropped={}|mean_rms={:.1}|end={}|suspect={}",
        metrics.frames,
        metrics.audio_ms,
        metrics.speech_ms,
        metrics.discarded_tail_frames,
        metrics.mean_rms,
        metrics.end_reason.label(),
        metrics.suspect,
    ));
}
