//! Translation dataplane
//!
//! The pipeline couples four cooperating stages per session:
//!
//! ```text
//! audio ─► AudioFramer ─► SttStage ─caption─► MtStage ─text─► TtsStage ─► audio
//!                              │                  │               │
//!                              └──── MetricsSink ◄┴───────────────┘
//! ```
//!
//! Stages are actors owning their private state, joined by bounded channels;
//! one STT pipeline per session, one MT+TTS pipeline per target language.
//! Cancellation is cooperative: each stage observes the session's cancel
//! signal at its next suspension point, drains briefly, emits its final
//! outputs, and exits.

pub mod framer;
pub mod metrics;
pub mod mt;
pub mod noop;
pub mod session;
pub mod stt;
pub mod tts;
pub mod vad;

pub use framer::AudioFramer;
pub use metrics::{MetricKey, MetricsSink, Rollup};
pub use mt::{ContextBuffer, Glossary, MtStage};
pub use noop::{NoopRecognizer, NoopTranslator, SilenceSynthesizer};
pub use session::{
    PipelineBackends, SessionEvent, SessionHandle, SessionPipeline, SessionState,
};
pub use stt::{LocalAgreement, SttStage};
pub use tts::{EngineRegistry, TtsStage};
pub use vad::{EnergyVad, UtteranceState, UtteranceTracker, VadEngine};

use thiserror::Error;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("STT error: {0}")]
    Stt(String),

    #[error("MT error: {0}")]
    Mt(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error(transparent)]
    Core(#[from] lingo_core::Error),
}
