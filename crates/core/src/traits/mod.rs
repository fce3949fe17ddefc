//! Backend traits for pluggable model engines
//!
//! The dataplane never talks to a model directly; every inference call goes
//! through one of these traits. Implementations own model loading, device
//! placement, and batching — none of which the pipeline needs to know about.

mod speech;
mod translate;

pub use speech::{RecognizedWord, SpeechRecognizer, SpeechSynthesizer, Transcription, VoiceConfig};
pub use translate::{SemanticScorer, Translator};
