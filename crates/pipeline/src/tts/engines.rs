//! Synthesis engine registry and voice presets
//!
//! Engines register behind the `SpeechSynthesizer` trait with an estimated
//! TTFT and the languages they carry voices for. Selection prefers the
//! preset's engine when it supports the voice, otherwise the lowest-latency
//! engine whose TTFT estimate fits the remaining budget.

use std::path::Path;
use std::sync::Arc;

use lingo_config::VoicePresetConfig;
use lingo_core::{Language, VoiceConfig};
use lingo_core::SpeechSynthesizer;

use crate::PipelineError;

/// A resolved voice preset for one target language
#[derive(Clone)]
pub struct VoicePreset {
    pub voice: VoiceConfig,
    /// Preferred engine name, if the preset pins one
    pub engine: Option<String>,
    /// Reference audio for voice-cloning engines
    pub reference: Option<Arc<[f32]>>,
}

impl VoicePreset {
    /// Resolve a configured preset, loading reference audio when present.
    /// A missing or unreadable reference WAV degrades to no cloning.
    pub fn from_config(language: Language, config: &VoicePresetConfig) -> Self {
        let reference = config.reference_wav.as_deref().and_then(|path| {
            match load_reference_audio(path) {
                Ok(samples) => Some(Arc::from(samples.into_boxed_slice())),
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to load reference audio, voice cloning disabled"
                    );
                    None
                },
            }
        });

        Self {
            voice: VoiceConfig::new(language, config.voice_id.clone()),
            engine: config.engine.clone(),
            reference,
        }
    }

    /// Default preset for a language with no configured voice
    pub fn default_for(language: Language) -> Self {
        Self {
            voice: VoiceConfig::new(language, format!("{}-default", language.code())),
            engine: None,
            reference: None,
        }
    }
}

/// Registry of available synthesis engines
#[derive(Default)]
pub struct EngineRegistry {
    engines: Vec<Arc<dyn SpeechSynthesizer>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn SpeechSynthesizer>) {
        tracing::info!(
            engine = engine.name(),
            ttft_ms = engine.estimated_ttft_ms(),
            "Registered synthesis engine"
        );
        self.engines.push(engine);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn SpeechSynthesizer>> {
        self.engines.iter().find(|e| e.name() == name).cloned()
    }

    /// Engines with a voice for `language`
    pub fn for_language(&self, language: Language) -> Vec<Arc<dyn SpeechSynthesizer>> {
        self.engines
            .iter()
            .filter(|e| e.supported_languages().contains(&language))
            .cloned()
            .collect()
    }

    /// Is any engine available for the language?
    pub fn supports(&self, language: Language) -> bool {
        !self.for_language(language).is_empty()
    }

    /// Engine selection policy.
    ///
    /// 1. The preset's pinned engine, when it carries the language.
    /// 2. The lowest-latency engine whose estimated TTFT fits the
    ///    remaining budget.
    /// 3. Failing that, the lowest-latency engine overall.
    pub fn select(
        &self,
        preset: &VoicePreset,
        remaining_budget_ms: u32,
    ) -> Option<Arc<dyn SpeechSynthesizer>> {
        let language = preset.voice.language;

        if let Some(pinned) = &preset.engine {
            if let Some(engine) = self.get(pinned) {
                if engine.supported_languages().contains(&language) {
                    return Some(engine);
                }
                tracing::debug!(
                    engine = %pinned,
                    language = %language,
                    "Pinned engine lacks the language, falling back to budget selection"
                );
            }
        }

        let mut candidates = self.for_language(language);
        candidates.sort_by_key(|e| e.estimated_ttft_ms());

        candidates
            .iter()
            .find(|e| e.estimated_ttft_ms() <= remaining_budget_ms)
            .or_else(|| candidates.first())
            .cloned()
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.engines.iter().map(|e| e.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

/// Load reference audio from a WAV file as mono f32 in [-1.0, 1.0]
pub fn load_reference_audio(path: &Path) -> Result<Vec<f32>, PipelineError> {
    use hound::WavReader;

    let reader = WavReader::open(path)
        .map_err(|e| PipelineError::Audio(format!("Failed to open reference audio: {e}")))?;

    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .filter_map(Result::ok)
            .collect(),
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .filter_map(Result::ok)
                .map(|s| s as f32 / max_val)
                .collect()
        },
    };

    // Downmix to mono by averaging channels
    let samples = if spec.channels == 2 {
        samples
            .chunks(2)
            .map(|chunk| (chunk[0] + chunk.get(1).copied().unwrap_or(0.0)) / 2.0)
            .collect()
    } else {
        samples
    };

    tracing::debug!(
        samples = samples.len(),
        sample_rate = spec.sample_rate,
        "Loaded reference audio"
    );

    Ok(samples)
}
