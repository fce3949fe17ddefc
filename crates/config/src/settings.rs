//! Main settings module

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use lingo_core::Language;

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Audio framing + recognition configuration
    #[serde(default)]
    pub stt: SttConfig,

    /// Word stabilization (LocalAgreement-2) configuration
    #[serde(default)]
    pub agreement: AgreementConfig,

    /// Machine translation configuration
    #[serde(default)]
    pub mt: MtConfig,

    /// Speech synthesis configuration
    #[serde(default)]
    pub tts: TtsConfig,

    /// Inter-stage channel capacities and backpressure
    #[serde(default)]
    pub channels: ChannelConfig,

    /// Session lifecycle configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Emit logs as JSON instead of human-readable lines
    #[serde(default)]
    pub log_json: bool,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_json: false,
        }
    }
}

/// Audio framing + recognition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SttConfig {
    /// Recognizer model identifier
    #[serde(default = "default_stt_model")]
    pub model: String,
    /// Recognizer sample rate in Hz; ingress audio is resampled to this
    #[serde(default = "default_stt_sample_rate")]
    pub sample_rate: u32,
    /// Frame duration in milliseconds
    #[serde(default = "default_chunk_ms")]
    pub chunk_ms: u32,
    /// Overlap between consecutive frames in milliseconds
    #[serde(default = "default_overlap_ms")]
    pub overlap_ms: u32,
    /// Rolling decode window handed to the recognizer each tick
    #[serde(default = "default_decode_window_ms")]
    pub decode_window_ms: u32,
    /// Frames older than this at stage entry are discarded
    #[serde(default = "default_max_frame_age_ms")]
    pub max_frame_age_ms: u64,
    /// Undelivered frames tolerated before the framer drops the eldest
    #[serde(default = "default_max_pending_frames")]
    pub max_pending_frames: usize,
    /// RMS normalization target in dBFS
    #[serde(default = "default_normalize_dbfs")]
    pub normalize_dbfs: f32,
    /// VAD speech probability threshold
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,
    /// Consecutive speech frames before an utterance opens
    #[serde(default = "default_min_speech_frames")]
    pub min_speech_frames: usize,
    /// Consecutive silence frames before an utterance closes
    #[serde(default = "default_min_silence_frames")]
    pub min_silence_frames: usize,
    /// Energy floor in dB below which a frame is silence regardless of VAD
    #[serde(default = "default_energy_floor_db")]
    pub energy_floor_db: f32,
}

fn default_stt_model() -> String {
    "whisper-small".to_string()
}
fn default_stt_sample_rate() -> u32 {
    16000
}
fn default_chunk_ms() -> u32 {
    250
}
fn default_overlap_ms() -> u32 {
    50
}
fn default_decode_window_ms() -> u32 {
    3000
}
fn default_max_frame_age_ms() -> u64 {
    5000
}
fn default_max_pending_frames() -> usize {
    32
}
fn default_normalize_dbfs() -> f32 {
    -20.0
}
fn default_vad_threshold() -> f32 {
    0.5
}
fn default_min_speech_frames() -> usize {
    1
}
fn default_min_silence_frames() -> usize {
    2
}
fn default_energy_floor_db() -> f32 {
    -55.0
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: default_stt_model(),
            sample_rate: default_stt_sample_rate(),
            chunk_ms: default_chunk_ms(),
            overlap_ms: default_overlap_ms(),
            decode_window_ms: default_decode_window_ms(),
            max_frame_age_ms: default_max_frame_age_ms(),
            max_pending_frames: default_max_pending_frames(),
            normalize_dbfs: default_normalize_dbfs(),
            vad_threshold: default_vad_threshold(),
            min_speech_frames: default_min_speech_frames(),
            min_silence_frames: default_min_silence_frames(),
            energy_floor_db: default_energy_floor_db(),
        }
    }
}

/// Word stabilization (LocalAgreement-2) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementConfig {
    /// Agreeing hypotheses required to confirm a word (K)
    #[serde(default = "default_agreement_threshold")]
    pub threshold: usize,
    /// Recent hypotheses considered (W)
    #[serde(default = "default_stability_window")]
    pub stability_window: usize,
    /// Minimum candidate confidence to participate
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    /// Maximum position drift for two occurrences to count as one word
    #[serde(default = "default_max_position_drift")]
    pub max_position_drift: usize,
    /// Temporal alignment window; confirmed words are garbage-collected
    /// after ten times this span
    #[serde(default = "default_temporal_window_ms")]
    pub temporal_window_ms: u64,
}

fn default_agreement_threshold() -> usize {
    2
}
fn default_stability_window() -> usize {
    3
}
fn default_confidence_threshold() -> f32 {
    0.7
}
fn default_max_position_drift() -> usize {
    2
}
fn default_temporal_window_ms() -> u64 {
    1000
}

impl Default for AgreementConfig {
    fn default() -> Self {
        Self {
            threshold: default_agreement_threshold(),
            stability_window: default_stability_window(),
            confidence_threshold: default_confidence_threshold(),
            max_position_drift: default_max_position_drift(),
            temporal_window_ms: default_temporal_window_ms(),
        }
    }
}

/// Machine translation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MtConfig {
    /// Rolling context: maximum sentence pairs retained
    #[serde(default = "default_context_max_sentences")]
    pub context_max_sentences: usize,
    /// Rolling context: maximum estimated tokens retained
    #[serde(default = "default_context_max_tokens")]
    pub context_max_tokens: usize,
    /// Minimum interval between translations of unchanged partials
    #[serde(default = "default_partial_min_interval_ms")]
    pub partial_min_interval_ms: u64,
    /// Pause length beyond which an unpunctuated sentence stops growing
    /// across utterance boundaries
    #[serde(default = "default_sentence_break_ms")]
    pub sentence_break_ms: u64,
    /// Per-request translator timeout
    #[serde(default = "default_mt_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Consecutive failures before the session surfaces a degraded flag
    #[serde(default = "default_error_window")]
    pub error_window: usize,
}

fn default_context_max_sentences() -> usize {
    3
}
fn default_context_max_tokens() -> usize {
    512
}
fn default_partial_min_interval_ms() -> u64 {
    500
}
fn default_sentence_break_ms() -> u64 {
    2000
}
fn default_mt_timeout_ms() -> u64 {
    15_000
}
fn default_error_window() -> usize {
    5
}

impl Default for MtConfig {
    fn default() -> Self {
        Self {
            context_max_sentences: default_context_max_sentences(),
            context_max_tokens: default_context_max_tokens(),
            partial_min_interval_ms: default_partial_min_interval_ms(),
            sentence_break_ms: default_sentence_break_ms(),
            request_timeout_ms: default_mt_timeout_ms(),
            error_window: default_error_window(),
        }
    }
}

/// Voice preset: maps a target language to a voice and an optional engine
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VoicePresetConfig {
    pub voice_id: String,
    /// Preferred engine name; selection falls back to the TTFT budget rule
    /// when the engine does not carry this voice
    #[serde(default)]
    pub engine: Option<String>,
    /// Reference WAV for voice-cloning engines
    #[serde(default)]
    pub reference_wav: Option<PathBuf>,
}

/// Speech synthesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Maximum emitted chunk duration in milliseconds
    #[serde(default = "default_tts_chunk_ms")]
    pub chunk_ms: u32,
    /// Deadline for the first chunk of a synthesis
    #[serde(default = "default_first_chunk_timeout_ms")]
    pub first_chunk_timeout_ms: u64,
    /// Remaining TTFT budget assumed when selecting an engine
    #[serde(default = "default_ttft_budget_ms")]
    pub ttft_budget_ms: u32,
    /// Voice presets keyed by target language code
    #[serde(default)]
    pub voice_presets: HashMap<String, VoicePresetConfig>,
    /// Enable per-chunk noise gate + RMS normalization
    #[serde(default = "default_true")]
    pub post_processing: bool,
    /// Noise gate floor in dB
    #[serde(default = "default_noise_gate_db")]
    pub noise_gate_db: f32,
}

fn default_tts_chunk_ms() -> u32 {
    100
}
fn default_first_chunk_timeout_ms() -> u64 {
    5000
}
fn default_ttft_budget_ms() -> u32 {
    450
}
fn default_true() -> bool {
    true
}
fn default_noise_gate_db() -> f32 {
    -60.0
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            chunk_ms: default_tts_chunk_ms(),
            first_chunk_timeout_ms: default_first_chunk_timeout_ms(),
            ttft_budget_ms: default_ttft_budget_ms(),
            voice_presets: HashMap::new(),
            post_processing: default_true(),
            noise_gate_db: default_noise_gate_db(),
        }
    }
}

/// Inter-stage channel capacities and backpressure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Audio frame channel capacity
    #[serde(default = "default_frame_capacity")]
    pub frames: usize,
    /// Caption update channel capacity
    #[serde(default = "default_caption_capacity")]
    pub captions: usize,
    /// Translation result channel capacity
    #[serde(default = "default_translation_capacity")]
    pub translations: usize,
    /// Blocked-send tolerance before dropping the oldest input item
    #[serde(default = "default_backpressure_deadline_ms")]
    pub backpressure_deadline_ms: u64,
}

fn default_frame_capacity() -> usize {
    32
}
fn default_caption_capacity() -> usize {
    64
}
fn default_translation_capacity() -> usize {
    16
}
fn default_backpressure_deadline_ms() -> u64 {
    250
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            frames: default_frame_capacity(),
            captions: default_caption_capacity(),
            translations: default_translation_capacity(),
            backpressure_deadline_ms: default_backpressure_deadline_ms(),
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Default source language for new sessions
    #[serde(default)]
    pub source_language: Language,
    /// Default target languages for new sessions
    #[serde(default = "default_target_languages")]
    pub target_languages: Vec<Language>,
    /// Idle timeout before a session is closed
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Drain deadline during cooperative cancellation
    #[serde(default = "default_drain_deadline_ms")]
    pub drain_deadline_ms: u64,
    /// Maximum concurrent sessions
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_target_languages() -> Vec<Language> {
    vec![Language::Spanish]
}
fn default_idle_timeout_ms() -> u64 {
    60_000
}
fn default_drain_deadline_ms() -> u64 {
    500
}
fn default_max_sessions() -> usize {
    100
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            source_language: Language::default(),
            target_languages: default_target_languages(),
            idle_timeout_ms: default_idle_timeout_ms(),
            drain_deadline_ms: default_drain_deadline_ms(),
            max_sessions: default_max_sessions(),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Mirror samples to the Prometheus exporter
    #[serde(default = "default_true")]
    pub prometheus: bool,
    /// Bounded per-key sample buffer for rollups; older samples are dropped
    #[serde(default = "default_sample_buffer")]
    pub sample_buffer: usize,
}

fn default_sample_buffer() -> usize {
    1024
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            prometheus: default_true(),
            sample_buffer: default_sample_buffer(),
        }
    }
}

impl Settings {
    /// Create default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_stt()?;
        self.validate_agreement()?;
        self.validate_mt()?;
        self.validate_tts()?;
        self.validate_channels()?;
        Ok(())
    }

    fn validate_stt(&self) -> Result<(), ConfigError> {
        let stt = &self.stt;

        if !(50..=1000).contains(&stt.chunk_ms) {
            return Err(ConfigError::InvalidValue {
                field: "stt.chunk_ms".to_string(),
                message: format!("Must be between 50 and 1000 ms, got {}", stt.chunk_ms),
            });
        }

        if stt.overlap_ms >= stt.chunk_ms {
            return Err(ConfigError::InvalidValue {
                field: "stt.overlap_ms".to_string(),
                message: format!(
                    "Overlap ({} ms) must be smaller than the chunk ({} ms)",
                    stt.overlap_ms, stt.chunk_ms
                ),
            });
        }

        if stt.sample_rate == 0 || stt.sample_rate % 1000 != 0 {
            return Err(ConfigError::InvalidValue {
                field: "stt.sample_rate".to_string(),
                message: format!("Must be a positive multiple of 1000, got {}", stt.sample_rate),
            });
        }

        if stt.max_pending_frames == 0 {
            return Err(ConfigError::InvalidValue {
                field: "stt.max_pending_frames".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&stt.vad_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "stt.vad_threshold".to_string(),
                message: format!("Must be between 0.0 and 1.0, got {}", stt.vad_threshold),
            });
        }

        Ok(())
    }

    fn validate_agreement(&self) -> Result<(), ConfigError> {
        let agreement = &self.agreement;

        if agreement.threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agreement.threshold".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if agreement.threshold > agreement.stability_window {
            return Err(ConfigError::InvalidValue {
                field: "agreement.threshold".to_string(),
                message: format!(
                    "Threshold ({}) cannot exceed the stability window ({})",
                    agreement.threshold, agreement.stability_window
                ),
            });
        }

        if !(0.0..=1.0).contains(&agreement.confidence_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "agreement.confidence_threshold".to_string(),
                message: format!(
                    "Must be between 0.0 and 1.0, got {}",
                    agreement.confidence_threshold
                ),
            });
        }

        Ok(())
    }

    fn validate_mt(&self) -> Result<(), ConfigError> {
        if self.mt.context_max_sentences == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mt.context_max_sentences".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        if self.mt.context_max_tokens == 0 {
            return Err(ConfigError::InvalidValue {
                field: "mt.context_max_tokens".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    fn validate_tts(&self) -> Result<(), ConfigError> {
        if !(10..=250).contains(&self.tts.chunk_ms) {
            return Err(ConfigError::InvalidValue {
                field: "tts.chunk_ms".to_string(),
                message: format!("Must be between 10 and 250 ms, got {}", self.tts.chunk_ms),
            });
        }

        Ok(())
    }

    fn validate_channels(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("channels.frames", self.channels.frames),
            ("channels.captions", self.channels.captions),
            ("channels.translations", self.channels.translations),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "Channel capacity must be at least 1".to_string(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.stt.chunk_ms, 250);
        assert_eq!(settings.stt.overlap_ms, 50);
        assert_eq!(settings.agreement.threshold, 2);
        assert_eq!(settings.agreement.stability_window, 3);
        assert_eq!(settings.mt.context_max_sentences, 3);
        assert_eq!(settings.mt.context_max_tokens, 512);
        assert_eq!(settings.tts.chunk_ms, 100);
        assert_eq!(settings.channels.frames, 32);
        assert_eq!(settings.channels.captions, 64);
        assert_eq!(settings.channels.translations, 16);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut settings = Settings::default();
        settings.stt.overlap_ms = settings.stt.chunk_ms;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_threshold_cannot_exceed_window() {
        let mut settings = Settings::default();
        settings.agreement.threshold = 4;
        settings.agreement.stability_window = 3;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_channel_capacity_rejected() {
        let mut settings = Settings::default();
        settings.channels.translations = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let settings = Settings::default();
        let toml = toml::to_string(&settings).unwrap();
        let back: Settings = toml::from_str(&toml).unwrap();
        assert_eq!(back.stt.chunk_ms, settings.stt.chunk_ms);
        assert_eq!(back.session.target_languages, settings.session.target_languages);
    }
}
