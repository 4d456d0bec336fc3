pub mod audio;
pub mod config;
pub mod error;
pub mod events;
mod lock;
mod logging;
mod telemetry;
#[cfg(feature = "vad_earshot")]
pub mod vad_earshot;

pub use audio::{
    AdaptiveVad, AudioFrame, AudioSource, CpalSource, MemorySink, RecorderState, RecorderStatus,
    ScriptedSource, SmartRecorder, Utterance, UtteranceHandle, UtteranceSink, WavFileSink,
    WavFileSource,
};
pub use config::{AppConfig, VadConfig};
pub use error::{ReadError, RecorderError, RecorderResult};
pub use events::{ChannelListener, NullListener, RecorderEvent, RecorderListener};
pub use logging::{crash_log_path, init_logging, log_debug, log_file_path, log_panic};
pub use telemetry::{init_tracing, tracing_log_path};
