//! No-model backend implementations
//!
//! Stand-ins for environments without loaded models, mirroring the real
//! backends' streaming behavior: the recognizer hears nothing, the
//! translator passes text through, the synthesizer speaks silence at a
//! plausible speaking rate. Production deployments register model-backed
//! implementations of the same traits.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use lingo_core::{
    Language, RecognizedWord, Result, SampleRate, SpeechRecognizer, SpeechSynthesizer,
    Transcription, Translator, VoiceConfig,
};

/// Recognizer that never hears anything
pub struct NoopRecognizer {
    languages: Vec<Language>,
}

impl NoopRecognizer {
    pub fn new() -> Self {
        Self {
            languages: Language::all().to_vec(),
        }
    }
}

impl Default for NoopRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechRecognizer for NoopRecognizer {
    async fn transcribe(&self, _samples: &[f32], _rate: SampleRate) -> Result<Transcription> {
        Ok(Transcription::default())
    }

    fn supported_languages(&self) -> &[Language] {
        &self.languages
    }

    fn model_name(&self) -> &str {
        "noop-stt"
    }
}

/// Pass-through translator
pub struct NoopTranslator {
    _private: (),
}

impl NoopTranslator {
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl Default for NoopTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Translator for NoopTranslator {
    async fn translate(&self, text: &str, _source: Language, _target: Language) -> Result<String> {
        Ok(text.to_string())
    }

    fn supports(&self, _source: Language, _target: Language) -> bool {
        true
    }

    fn model_id(&self) -> &str {
        "noop"
    }
}

/// Synthesizer producing silence at a plausible speaking rate (~50 ms per
/// character), streamed in small buffers
pub struct SilenceSynthesizer {
    name: &'static str,
    ttft_ms: u32,
    sample_rate: SampleRate,
    languages: Vec<Language>,
}

impl SilenceSynthesizer {
    pub fn new() -> Self {
        Self::with_profile("silence", 50, SampleRate::Hz22050, Language::all().to_vec())
    }

    /// Profile constructor for registries and tests
    pub fn with_profile(
        name: &'static str,
        ttft_ms: u32,
        sample_rate: SampleRate,
        languages: Vec<Language>,
    ) -> Self {
        Self {
            name,
            ttft_ms,
            sample_rate,
            languages,
        }
    }
}

impl Default for SilenceSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSynthesizer for SilenceSynthesizer {
    fn synthesize_stream(
        &self,
        text: &str,
        _voice: &VoiceConfig,
    ) -> Pin<Box<dyn Stream<Item = Result<Vec<f32>>> + Send + '_>> {
        // ~50ms of audio per character, streamed in 60ms buffers
        let total_samples = text.chars().count() * self.sample_rate.samples_for_ms(50);
        let buffer_samples = self.sample_rate.samples_for_ms(60).max(1);

        Box::pin(async_stream::stream! {
            let mut remaining = total_samples;
            while remaining > 0 {
                let take = remaining.min(buffer_samples);
                remaining -= take;
                yield Ok(vec![0.0f32; take]);
            }
        })
    }

    fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    fn name(&self) -> &str {
        self.name
    }

    fn estimated_ttft_ms(&self) -> u32 {
        self.ttft_ms
    }

    fn supported_languages(&self) -> &[Language] {
        &self.languages
    }
}
