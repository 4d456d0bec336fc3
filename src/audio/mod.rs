//! Utterance capture pipeline: frames in, persisted utterances out.
//!
//! Each frame is scored by volume against an adaptive noise threshold,
//! optionally fused with a secondary classifier, and fed to a small state
//! machine that decides when speech starts and ends. The recorder segments
//! the stream on those edges and hands each utterance to a sink.

/// Captured audio is always mono.
pub const CAPTURE_CHANNELS: u16 = 1;

mod capture;
mod classifier;
mod confidence;
mod detector;
mod dispatch;
mod frame;
mod meter;
mod noise;
mod pause;
mod recorder;
mod resample;
mod sink;
mod source;
mod vad;
mod volume;

pub(crate) use frame::frame_duration;

pub use capture::{CaptureEvent, CompletedUtterance, UtteranceCapture, UtteranceMetrics};
pub use classifier::{
    EnergyPatternClassifier, SecondaryClassifier, SpeechClassifier, SPEECH_CONFIDENCE,
};
pub use confidence::{volume_confidence, ConfidenceScorer};
pub use detector::{AdaptiveVad, VadDebugInfo, VadOutcome};
pub use frame::{AudioFrame, FrameClock, FrameFormat, SAMPLE_WIDTH_BYTES};
pub use meter::LiveMeter;
pub use noise::NoiseFloorEstimator;
pub use pause::PauseDetector;
pub use recorder::{RecorderState, RecorderStatus, SmartRecorder};
pub use sink::{write_wav, MemorySink, Utterance, UtteranceHandle, UtteranceSink, WavFileSink};
pub use source::{
    chunk_frames, list_input_devices, load_wav_samples, AudioSource, CpalSource, FrameStream,
    ScriptStep, ScriptedSource, WavFileSource,
};
pub use vad::{EndReason, Step, Transition, VadState, VadStateMachine};
pub use volume::VolumeTracker;
