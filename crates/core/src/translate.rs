//! Translation request/result types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Language;

/// Marker text for a failed translation.
///
/// Results carrying this text have `confidence == 0.0` and must never be
/// synthesized or displayed.
pub const TRANSLATION_ERROR_TEXT: &str = "[Translation Error]";

/// A unit of text handed to the MT stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    pub source_lang: Language,
    pub target_lang: Language,
    /// Rolling-context snapshot taken when the request was formed
    #[serde(default)]
    pub context: Option<String>,
    /// Partial (interim) segment vs a confirmed sentence boundary
    #[serde(default)]
    pub is_partial: bool,
    /// Orders results back onto the caption stream they derive from
    pub sequence_id: u64,
    pub session_id: String,
}

/// Output of one MT stage pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationResult {
    pub text: String,
    /// Composite confidence in [0.0, 1.0]; 0.0 marks a failure
    pub confidence: f32,
    pub source_lang: Language,
    pub target_lang: Language,
    /// Wall time spent producing this result
    pub latency_ms: f64,
    /// Identifier of the model (or "cached") that produced the text
    pub model_id: String,
    pub used_context: bool,
    /// Glossary substitutions applied before translation
    #[serde(default)]
    pub applied_terms: HashMap<String, String>,
    pub is_partial: bool,
    pub sequence_id: u64,
    /// Capture timestamp of the utterance this result derives from; carried
    /// for latency stamping, never serialized
    #[serde(skip)]
    pub utterance_started_at: Option<std::time::Instant>,
}

impl TranslationResult {
    /// Build the standard failure marker result
    pub fn failure(request: &TranslationRequest, latency_ms: f64) -> Self {
        Self {
            text: TRANSLATION_ERROR_TEXT.to_string(),
            confidence: 0.0,
            source_lang: request.source_lang,
            target_lang: request.target_lang,
            latency_ms,
            model_id: "error".to_string(),
            used_context: false,
            applied_terms: HashMap::new(),
            is_partial: request.is_partial,
            sequence_id: request.sequence_id,
            utterance_started_at: None,
        }
    }

    /// Is this the failure marker? Callers must not display or play it.
    pub fn is_failure(&self) -> bool {
        self.confidence == 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_marker() {
        let request = TranslationRequest {
            text: "hola".to_string(),
            source_lang: Language::Spanish,
            target_lang: Language::English,
            context: None,
            is_partial: false,
            sequence_id: 7,
            session_id: "s".to_string(),
        };
        let result = TranslationResult::failure(&request, 12.0);
        assert!(result.is_failure());
        assert_eq!(result.text, TRANSLATION_ERROR_TEXT);
        assert_eq!(result.sequence_id, 7);
    }
}
