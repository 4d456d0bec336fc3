//! Continuous utterance recorder.
//!
//! `SmartRecorder` owns one capture thread per session. That thread opens the
//! source, runs every frame through the detector and segmenter, and persists
//! each finished utterance before re-arming. The control thread only flips the
//! pause and stop flags and reads status snapshots.

use super::capture::{log_utterance_metrics, CaptureEvent, CompletedUtterance, UtteranceCapture};
use super::detector::{AdaptiveVad, VadDebugInfo, VadOutcome};
use super::frame::{AudioFrame, FrameClock, FrameFormat};
use super::meter::LiveMeter;
use super::sink::UtteranceSink;
use super::source::{AudioSource, FrameStream};
use super::vad::{EndReason, Transition, VadState};
use crate::config::VadConfig;
use crate::error::{ReadError, RecorderError, RecorderResult};
use crate::events::{NullListener, RecorderListener};
use crate::lock::lock_or_recover;
use crate::log_debug;
use crossbeam_channel::bounded;
use serde::{Serialize, Serializer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sleep between pause-flag checks while paused.
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    Listening,
    Recording,
    Processing,
    Completed,
    Error,
}

impl RecorderState {
    pub fn label(self) -> &'static str {
        match self {
            RecorderState::Idle => "idle",
            RecorderState::Listening => "listening",
            RecorderState::Recording => "recording",
            RecorderState::Processing => "processing",
            RecorderState::Completed => "completed",
            RecorderState::Error => "error",
        }
    }
}

/// Read-only snapshot returned by [`SmartRecorder::status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecorderStatus {
    pub state: RecorderState,
    pub paused: bool,
    pub vad_state: VadState,
    pub vad_debug: Option<VadDebugInfo>,
    #[serde(rename = "elapsed_recording_ms", serialize_with = "as_millis")]
    pub elapsed_recording: Duration,
    #[serde(rename = "stream_time_ms", serialize_with = "as_millis")]
    pub stream_time: Duration,
    pub frames_processed: u64,
    pub utterances_completed: u64,
    pub read_failures: u64,
    pub dropped_frames: usize,
    pub last_error: Option<String>,
}

impl Default for RecorderStatus {
    fn default() -> Self {
        Self {
            state: RecorderState::Idle,
            paused: false,
            vad_state: VadState::Idle,
            vad_debug: None,
            elapsed_recording: Duration::ZERO,
            stream_time: Duration::ZERO,
            frames_processed: 0,
            utterances_completed: 0,
            read_failures: 0,
            dropped_frames: 0,
            last_error: None,
        }
    }
}

fn as_millis<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
}

/// State shared between the control side and the capture thread.
struct Shared {
    status: Mutex<RecorderStatus>,
    paused: AtomicBool,
    stop: AtomicBool,
    meter: LiveMeter,
}

impl Shared {
    fn update<F: FnOnce(&mut RecorderStatus)>(&self, apply: F) {
        apply(&mut lock_or_recover(&self.status, "recorder_status"));
    }

    fn state(&self) -> RecorderState {
        lock_or_recover(&self.status, "recorder_status").state
    }

    fn set_state(&self, state: RecorderState) {
        self.update(|status| status.state = state);
    }
}

/// Hands-free, multi-utterance recorder.
pub struct SmartRecorder {
    config: VadConfig,
    source: Arc<dyn AudioSource>,
    listener: Arc<dyn RecorderListener>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl SmartRecorder {
    /// Validate `config` up front so a bad value never reaches capture.
    pub fn new(config: VadConfig, source: Arc<dyn AudioSource>) -> RecorderResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            source,
            listener: Arc::new(NullListener),
            shared: Arc::new(Shared {
                status: Mutex::new(RecorderStatus::default()),
                paused: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                meter: LiveMeter::new(),
            }),
            worker: None,
        })
    }

    pub fn with_listener(mut self, listener: Arc<dyn RecorderListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    /// Live volume of the latest processed frame.
    pub fn meter(&self) -> LiveMeter {
        self.shared.meter.clone()
    }

    /// Open the source and start the capture thread. Requires Idle.
    ///
    /// Returns once the source is open and the recorder is Listening.
    pub fn start(&mut self, sink: Box<dyn UtteranceSink>) -> RecorderResult<()> {
        let state = self.shared.state();
        if state != RecorderState::Idle {
            return Err(RecorderError::AlreadyRunning {
                state: state.label(),
            });
        }
        self.reap_worker();

        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.meter.reset();
        self.shared.update(|status| *status = RecorderStatus::default());

        let vad = AdaptiveVad::new(&self.config)?;
        let capture = UtteranceCapture::new(&self.config);
        let format = FrameFormat::from_config(&self.config);
        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.shared);
        let listener = Arc::clone(&self.listener);
        let max_recording = self.config.max_recording_duration;
        let (ready_tx, ready_rx) = bounded::<RecorderResult<()>>(1);

        let handle = thread::Builder::new()
            .name("voxlisten-capture".to_string())
            .spawn(move || {
                let stream = match source.open(&format) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                shared.set_state(RecorderState::Listening);
                let _ = ready_tx.send(Ok(()));
                let worker = CaptureWorker {
                    stream,
                    vad,
                    capture,
                    clock: FrameClock::new(format.frame_duration()),
                    max_recording,
                    sink,
                    listener,
                    shared,
                };
                worker.run();
            })
            .map_err(|err| {
                RecorderError::SourceUnavailable(format!("failed to spawn capture thread: {err}"))
            })?;

        let opened = ready_rx.recv().unwrap_or_else(|_| {
            Err(RecorderError::SourceUnavailable(
                "capture thread exited before opening the source".to_string(),
            ))
        });
        match opened {
            Ok(()) => {
                log_debug(&format!("recorder started on {}", self.source.describe()));
                tracing::info!(source = %self.source.describe(), "recorder_started");
                self.worker = Some(handle);
                Ok(())
            }
            Err(err) => {
                let _ = handle.join();
                log_debug(&format!("recorder failed to start: {err}"));
                tracing::warn!(error = %err, "recorder_start_failed");
                Err(err)
            }
        }
    }

    /// Suspend frame processing; buffered input is drained and discarded.
    pub fn pause(&self) {
        if !self.shared.paused.swap(true, Ordering::SeqCst) {
            log_debug("recorder paused");
        }
    }

    pub fn resume(&self) {
        if self.shared.paused.swap(false, Ordering::SeqCst) {
            log_debug("recorder resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Stop capture and return to Idle. An in-progress utterance is dropped.
    /// Also clears the Error state.
    pub fn stop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.reap_worker();
        self.shared.paused.store(false, Ordering::SeqCst);
        self.shared.set_state(RecorderState::Idle);
        self.shared.meter.reset();
    }

    /// Block until the capture thread exits on its own (end of input or a
    /// fatal error). Returns immediately when no session is running.
    pub fn wait(&mut self) -> RecorderState {
        self.reap_worker();
        self.shared.state()
    }

    pub fn status(&self) -> RecorderStatus {
        let mut status = lock_or_recover(&self.shared.status, "recorder_status").clone();
        status.paused = self.shared.paused.load(Ordering::SeqCst);
        status
    }

    pub fn state(&self) -> RecorderState {
        self.shared.state()
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn reap_worker(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log_debug("capture thread panicked");
                self.shared.update(|status| {
                    status.state = RecorderState::Error;
                    status.last_error = Some("capture thread panicked".to_string());
                });
            }
        }
    }
}

impl Drop for SmartRecorder {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.shared.stop.store(true, Ordering::SeqCst);
            self.reap_worker();
        }
    }
}

/// How a capture session ended.
enum SessionEnd {
    Stopped,
    Exhausted,
    Failed(RecorderError),
}

struct CaptureWorker {
    stream: Box<dyn FrameStream>,
    vad: AdaptiveVad,
    capture: UtteranceCapture,
    clock: FrameClock,
    max_recording: Duration,
    sink: Box<dyn UtteranceSink>,
    listener: Arc<dyn RecorderListener>,
    shared: Arc<Shared>,
}

impl CaptureWorker {
    fn run(mut self) {
        self.listener.on_listening_start();
        let end = self.run_loop();
        self.stream.close();

        let discarded = self.capture.discard();
        if discarded > 0 {
            log_debug(&format!("discarded {discarded} frames of an unfinished utterance"));
        }
        self.shared.meter.reset();
        match end {
            SessionEnd::Failed(err) => {
                log_debug(&format!("capture loop halted: {err}"));
                tracing::error!(kind = err.label(), error = %err, "capture_failed");
                self.shared.update(|status| {
                    status.state = RecorderState::Error;
                    status.last_error = Some(err.to_string());
                });
                self.listener.on_error(&err);
            }
            SessionEnd::Stopped | SessionEnd::Exhausted => {
                let reason = if matches!(end, SessionEnd::Stopped) {
                    "stopped"
                } else {
                    "input exhausted"
                };
                log_debug(&format!("capture loop finished: {reason}"));
                tracing::info!(reason, "capture_finished");
                self.shared.update(|status| {
                    status.state = RecorderState::Idle;
                    status.elapsed_recording = Duration::ZERO;
                });
                self.listener.on_listening_stop();
            }
        }
    }

    fn stop_requested(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }

    fn run_loop(&mut self) -> SessionEnd {
        loop {
            if self.stop_requested() {
                return SessionEnd::Stopped;
            }
            if self.shared.paused.load(Ordering::SeqCst) {
                self.stream.drain();
                thread::sleep(PAUSE_POLL_INTERVAL);
                continue;
            }

            let frame = match self.stream.read_frame() {
                Ok(frame) => Some(frame),
                Err(ReadError::Pending) => continue,
                Err(ReadError::Transient(message)) => {
                    let err = RecorderError::ReadFailure(message);
                    log_debug(&format!("{err}; skipping frame"));
                    self.shared.update(|status| {
                        status.read_failures += 1;
                        status.last_error = Some(err.to_string());
                    });
                    self.listener.on_error(&err);
                    None
                }
                Err(ReadError::Disconnected(message)) => {
                    return SessionEnd::Failed(RecorderError::SourceLost(message));
                }
                Err(ReadError::Exhausted) => return SessionEnd::Exhausted,
            };

            // A stop that raced the read must not let this frame finish an utterance.
            if self.stop_requested() {
                return SessionEnd::Stopped;
            }
            self.process(frame);
        }
    }

    /// Run one tick. A missing frame advances the detector as silence
    /// without adding audio.
    fn process(&mut self, frame: Option<AudioFrame>) {
        let at = self.clock.tick();
        let (outcome, event) = match frame {
            Some(frame) => {
                let outcome = self.vad.detect(&frame, at);
                let event = self.capture.on_frame(frame, &outcome, at);
                (outcome, event)
            }
            None => {
                let outcome = self.vad.detect_gap(at);
                let event = self.capture.on_gap(&outcome, at);
                (outcome, event)
            }
        };
        self.shared.meter.set_volume(outcome.debug.volume);

        match event {
            Some(CaptureEvent::Started) => {
                self.shared.set_state(RecorderState::Recording);
                self.listener.on_recording_start();
            }
            Some(CaptureEvent::Completed(done)) => self.complete(done),
            None => {
                if ended_without_audio(&outcome) {
                    self.shared.set_state(RecorderState::Listening);
                    self.listener.on_recording_stop();
                }
                self.enforce_recording_cap(at);
            }
        }
        self.publish(&outcome, at);
    }

    /// Recorder-level cap, independent of the detector's own timeout.
    fn enforce_recording_cap(&mut self, at: Duration) {
        let over_cap = self
            .capture
            .elapsed(at)
            .is_some_and(|elapsed| elapsed >= self.max_recording);
        if !over_cap {
            return;
        }
        let speech_duration = match self.vad.force_end(EndReason::RecorderSafetyNet, at) {
            Some(Transition::SpeechEnded { duration, .. }) => duration,
            _ => self.capture.elapsed(at).unwrap_or_default(),
        };
        if let Some(done) = self
            .capture
            .force_finish(EndReason::RecorderSafetyNet, speech_duration)
        {
            self.complete(done);
        }
    }

    fn complete(&mut self, done: CompletedUtterance) {
        self.shared.set_state(RecorderState::Processing);
        if done.metrics.end_reason.is_timeout() {
            self.listener.on_timeout();
        }
        self.listener.on_recording_stop();
        log_utterance_metrics(&done.metrics);
        tracing::info!(
            frames = done.metrics.frames,
            audio_ms = done.metrics.audio_ms,
            speech_ms = done.metrics.speech_ms,
            end_reason = done.metrics.end_reason.label(),
            suspect = done.metrics.suspect,
            "utterance_complete"
        );

        match self.sink.persist(&done.utterance) {
            Ok(handle) => {
                self.shared.update(|status| {
                    status.state = RecorderState::Completed;
                    status.utterances_completed += 1;
                });
                log_debug(&format!("utterance persisted: {handle}"));
                self.listener.on_recording_complete(&handle, &done.metrics);
            }
            Err(err) => {
                let err = RecorderError::PersistenceFailure(err);
                log_debug(&format!("{err}"));
                tracing::error!(error = %err, "utterance_persist_failed");
                self.shared
                    .update(|status| status.last_error = Some(err.to_string()));
                self.listener.on_error(&err);
            }
        }
        self.shared.set_state(RecorderState::Listening);
    }

    fn publish(&self, outcome: &VadOutcome, at: Duration) {
        let elapsed = self.capture.elapsed(at).unwrap_or_default();
        let dropped = self.stream.dropped_frames();
        self.shared.update(|status| {
            status.vad_state = outcome.state;
            status.vad_debug = Some(outcome.debug);
            status.elapsed_recording = elapsed;
            status.stream_time = at;
            status.frames_processed = self.clock.frames();
            status.dropped_frames = dropped;
        });
    }
}

/// The detector closed an utterance but the segmenter had nothing to hand over.
fn ended_without_audio(outcome: &VadOutcome) -> bool {
    matches!(outcome.transition, Some(Transition::SpeechEnded { .. }))
}
