//! Error taxonomy for capture, detection, and persistence.

use thiserror::Error;

/// Errors surfaced by the recorder, either from `start()` or via `on_error`.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// The capture source could not be opened (device missing, busy, or denied).
    #[error("audio source unavailable: {0}")]
    SourceUnavailable(String),

    /// A single read failed on an otherwise healthy source; the frame is skipped.
    #[error("audio read failed: {0}")]
    ReadFailure(String),

    /// The source went away mid-session; the capture loop halts.
    #[error("audio source lost: {0}")]
    SourceLost(String),

    /// The sink rejected a completed utterance. The frames are not retried.
    #[error("failed to persist utterance: {0:#}")]
    PersistenceFailure(anyhow::Error),

    /// Out-of-range parameters, rejected before any capture begins.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("recorder is busy (state: {state})")]
    AlreadyRunning { state: &'static str },
}

impl RecorderError {
    pub fn label(&self) -> &'static str {
        match self {
            RecorderError::SourceUnavailable(_) => "source_unavailable",
            RecorderError::ReadFailure(_) => "read_failure",
            RecorderError::SourceLost(_) => "source_lost",
            RecorderError::PersistenceFailure(_) => "persistence_failure",
            RecorderError::InvalidConfiguration(_) => "invalid_configuration",
            RecorderError::AlreadyRunning { .. } => "already_running",
        }
    }
}

/// Outcome of a failed `FrameStream::read_frame` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// No frame within one frame period. The caller polls again.
    #[error("no frame ready yet")]
    Pending,
    #[error("transient read error: {0}")]
    Transient(String),
    #[error("source disconnected: {0}")]
    Disconnected(String),
    /// Finite sources (file replay, scripted PCM) ran out of frames.
    #[error("source exhausted")]
    Exhausted,
}

pub type RecorderResult<T> = Result<T, RecorderError>;
