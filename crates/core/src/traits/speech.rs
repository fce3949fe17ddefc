//! Speech processing traits

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{Language, Result, SampleRate};

/// One word as recognized in a single hypothesis pass
#[derive(Debug, Clone)]
pub struct RecognizedWord {
    pub text: String,
    /// Recognizer confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Start offset within the decoded window, seconds
    pub start_time: f64,
    /// End offset within the decoded window, seconds
    pub end_time: f64,
}

/// Output of one recognizer pass over a window of audio
#[derive(Debug, Clone, Default)]
pub struct Transcription {
    pub words: Vec<RecognizedWord>,
    /// Language the recognizer detected, if it reports one
    pub language: Option<Language>,
}

impl Transcription {
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Speech-to-text interface.
///
/// The STT stage calls this once per tick with the rolling window of recent
/// speech samples; successive calls over overlapping windows produce the
/// hypothesis stream the agreement filter stabilizes.
#[async_trait]
pub trait SpeechRecognizer: Send + Sync + 'static {
    /// Decode a window of mono samples into a word-level hypothesis
    async fn transcribe(&self, samples: &[f32], sample_rate: SampleRate) -> Result<Transcription>;

    /// Get supported languages
    fn supported_languages(&self) -> &[Language];

    /// Get model name for logging and metric attribution
    fn model_name(&self) -> &str;

    /// Check if a specific language is supported
    fn supports_language(&self, lang: Language) -> bool {
        self.supported_languages().contains(&lang)
    }
}

/// Voice selection for synthesis
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub language: Language,
    pub voice_id: String,
    /// Speaking rate (1.0 = normal)
    pub speaking_rate: f32,
}

impl VoiceConfig {
    pub fn new(language: Language, voice_id: impl Into<String>) -> Self {
        Self {
            language,
            voice_id: voice_id.into(),
            speaking_rate: 1.0,
        }
    }
}

/// Text-to-speech interface.
///
/// Implementations stream raw sample buffers as they are generated; the TTS
/// stage re-chunks, post-processes, and tags them. Buffers should be small
/// enough that the first one is available well before synthesis completes.
pub trait SpeechSynthesizer: Send + Sync + 'static {
    /// Stream synthesized audio for `text`
    fn synthesize_stream(
        &self,
        text: &str,
        voice: &VoiceConfig,
    ) -> Pin<Box<dyn Stream<Item = Result<Vec<f32>>> + Send + '_>>;

    /// Output sample rate of this engine
    fn sample_rate(&self) -> SampleRate;

    /// Engine name for logging and metric attribution
    fn name(&self) -> &str;

    /// Estimated time to first audio buffer, used by engine selection
    fn estimated_ttft_ms(&self) -> u32;

    /// Languages this engine has voices for
    fn supported_languages(&self) -> &[Language];
}
