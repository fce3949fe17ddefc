//! Core traits and types for the translation dataplane
//!
//! This crate provides the foundational types used across all other crates:
//! - Audio frame types and processing helpers
//! - Caption types (word candidates, stable words, caption updates)
//! - Translation request/result types
//! - Synthesized audio chunk types
//! - Language definitions
//! - Backend traits for pluggable recognizers, translators, and synthesizers
//! - Error types

pub mod audio;
pub mod caption;
pub mod error;
pub mod language;
pub mod synth;
pub mod traits;
pub mod translate;

pub use audio::{
    calculate_energy_db, pcm16_bytes, resample, rms_normalize, AudioFrame, SampleRate,
};
pub use caption::{Caption, CaptionUpdate, StableWord, WordCandidate};
pub use error::{Error, Result};
pub use language::Language;
pub use synth::AudioChunk;
pub use translate::{TranslationRequest, TranslationResult, TRANSLATION_ERROR_TEXT};

pub use traits::{
    RecognizedWord, SemanticScorer, SpeechRecognizer, SpeechSynthesizer, Transcription,
    Translator, VoiceConfig,
};

/// Current wall-clock time as Unix epoch milliseconds.
///
/// Used for serialized timestamps (`confirmed_at_ms` and the like); latency
/// measurement always uses `Instant`, never this.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
