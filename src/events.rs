//! Recorder lifecycle callbacks and their serializable event form.

use crate::audio::{UtteranceHandle, UtteranceMetrics};
use crate::error::RecorderError;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;

/// Lifecycle callbacks, invoked synchronously on the capture thread.
///
/// Implementations must return promptly; a blocked callback stalls capture.
pub trait RecorderListener: Send + Sync {
    fn on_listening_start(&self) {}
    fn on_recording_start(&self) {}
    fn on_recording_stop(&self) {}
    fn on_recording_complete(&self, _handle: &UtteranceHandle, _metrics: &UtteranceMetrics) {}
    fn on_timeout(&self) {}
    fn on_error(&self, _error: &RecorderError) {}
    /// The capture loop ended without an error (stop or end of input).
    fn on_listening_stop(&self) {}
}

/// Listener that ignores every callback.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl RecorderListener for NullListener {}

/// Callbacks as data, for channels and JSON output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecorderEvent {
    ListeningStart,
    RecordingStart,
    RecordingStop,
    RecordingComplete {
        handle: UtteranceHandle,
        metrics: UtteranceMetrics,
    },
    Timeout,
    Error {
        kind: &'static str,
        message: String,
    },
    ListeningStop,
}

impl RecorderEvent {
    pub fn from_error(error: &RecorderError) -> Self {
        RecorderEvent::Error {
            kind: error.label(),
            message: error.to_string(),
        }
    }
}

/// Forwards every callback into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: Sender<RecorderEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, Receiver<RecorderEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    fn send(&self, event: RecorderEvent) {
        // A dropped receiver only means nobody is watching any more.
        let _ = self.sender.send(event);
    }
}

impl RecorderListener for ChannelListener {
    fn on_listening_start(&self) {
        self.send(RecorderEvent::ListeningStart);
    }

    fn on_recording_start(&self) {
        self.send(RecorderEvent::RecordingStart);
    }

    fn on_recording_stop(&self) {
        self.send(RecorderEvent::RecordingStop);
    }

    fn on_recording_complete(&self, handle: &UtteranceHandle, metrics: &UtteranceMetrics) {
        self.send(RecorderEvent::RecordingComplete {
            handle: handle.clone(),
            metrics: metrics.clone(),
        });
    }

    fn on_timeout(&self) {
        self.send(RecorderEvent::Timeout);
    }

    fn on_error(&self, error: &RecorderError) {
        self.send(RecorderEvent::from_error(error));
    }

    fn on_listening_stop(&self) {
        self.send(RecorderEvent::ListeningStop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::EndReason;

    #[test]
    fn channel_listener_forwards_in_order() {
        let (listener, events) = ChannelListener::new();
        listener.on_listening_start();
        listener.on_recording_start();
        listener.on_timeout();
        listener.on_recording_stop();
        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                RecorderEvent::ListeningStart,
                RecorderEvent::RecordingStart,
                RecorderEvent::Timeout,
                RecorderEvent::RecordingStop,
            ]
        );
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = RecorderEvent::RecordingComplete {
            handle: UtteranceHandle::new("/tmp/a.wav"),
            metrics: UtteranceMetrics {
                frames: 3,
                audio_ms: 192,
                speech_ms: 128,
                discarded_tail_frames: 1,
                mean_rms: 100.0,
                end_reason: EndReason::SilenceFrames,
                suspect: true,
            },
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], "recording_complete");
        assert_eq!(json["handle"], "/tmp/a.wav");
        assert_eq!(json["metrics"]["end_reason"], "silence_frames");
    }

    #[test]
    fn error_event_carries_kind() {
        let event = RecorderEvent::from_error(&RecorderError::ReadFailure("glitch".into()));
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], "error");
        assert_eq!(json["kind"], "read_failure");
        assert_eq!(json["message"], "audio read failed: glitch");
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (listener, events) = ChannelListener::new();
        drop(events);
        listener.on_recording_start();
    }
}
