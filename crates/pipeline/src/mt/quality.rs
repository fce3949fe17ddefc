//! Translation quality assessment
//!
//! Composite confidence in [0.1, 1.0] from weighted factors: length-ratio
//! sanity, repetition penalty, character-set coverage for the target
//! language, semantic similarity (when a scorer is wired), and context
//! coherence. Absent factors drop out of the weighted average, so losing
//! the semantic scorer degrades the estimate instead of failing it.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use lingo_core::{Language, SemanticScorer};

const WEIGHT_LENGTH: f64 = 0.15;
const WEIGHT_REPETITION: f64 = 0.25;
const WEIGHT_COVERAGE: f64 = 0.20;
const WEIGHT_SEMANTIC: f64 = 0.30;
const WEIGHT_CONTEXT: f64 = 0.10;

const HISTORY_CAP: usize = 100;

/// Composite confidence estimator for one (session, target) stream
pub struct QualityFilter {
    scorer: Option<Arc<dyn SemanticScorer>>,
    /// Recent translation hashes per pair, for repeated-output detection
    recent: HashMap<(Language, Language), VecDeque<u64>>,
}

impl QualityFilter {
    pub fn new(scorer: Option<Arc<dyn SemanticScorer>>) -> Self {
        Self {
            scorer,
            recent: HashMap::new(),
        }
    }

    /// Composite confidence for one translation
    pub async fn confidence(
        &mut self,
        original: &str,
        translation: &str,
        source: Language,
        target: Language,
        context: Option<&str>,
    ) -> f32 {
        let mut factors: Vec<(f64, f64)> = Vec::with_capacity(5);

        factors.push((length_factor(original, translation), WEIGHT_LENGTH));
        factors.push((
            1.0 - self.repetition_penalty(translation, source, target),
            WEIGHT_REPETITION,
        ));
        factors.push((coverage_factor(translation, target), WEIGHT_COVERAGE));

        if let Some(scorer) = &self.scorer {
            match scorer.similarity(original, translation).await {
                Ok(similarity) => {
                    // Cross-lingual similarity runs low; re-center it
                    let normalized = ((similarity as f64 + 0.2) / 0.8).clamp(0.0, 1.0);
                    factors.push((normalized, WEIGHT_SEMANTIC));
                },
                Err(e) => {
                    tracing::debug!(error = %e, "Semantic scorer unavailable, using remaining factors");
                },
            }

            if let Some(context) = context.filter(|c| !c.is_empty()) {
                if let Ok(coherence) = self.context_coherence(context, translation).await {
                    factors.push((coherence, WEIGHT_CONTEXT));
                }
            }
        }

        let total_weight: f64 = factors.iter().map(|(_, w)| w).sum();
        if total_weight == 0.0 {
            return 0.5;
        }
        let weighted: f64 =
            factors.iter().map(|(score, w)| score * w).sum::<f64>() / total_weight;

        weighted.clamp(0.1, 1.0) as f32
    }

    /// Repetition penalty: immediate word repeats, repeated 3-grams, and
    /// exact repeats of recent outputs for the pair.
    fn repetition_penalty(&mut self, text: &str, source: Language, target: Language) -> f64 {
        let words: Vec<String> = text.to_lowercase().split_whitespace().map(String::from).collect();
        if words.len() < 3 {
            return 0.0;
        }

        let immediate = words.windows(2).filter(|w| w[0] == w[1]).count();
        let immediate_penalty = (immediate as f64 / words.len() as f64).min(0.5);

        let mut phrases: HashMap<String, usize> = HashMap::new();
        for window in words.windows(3) {
            *phrases.entry(window.join(" ")).or_default() += 1;
        }
        let repeated = phrases.values().filter(|&&count| count > 1).count();
        let phrase_penalty = (repeated as f64 / phrases.len().max(1) as f64).min(0.3);

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let digest = hasher.finish();

        let history = self.recent.entry((source, target)).or_default();
        history.push_back(digest);
        while history.len() > HISTORY_CAP {
            history.pop_front();
        }
        let repeats = history.iter().filter(|&&h| h == digest).count();
        let history_penalty = if repeats > 1 {
            (((repeats - 1) as f64) * 0.1).min(0.2)
        } else {
            0.0
        };

        immediate_penalty + phrase_penalty + history_penalty
    }

    /// Mean similarity of the translation to the most recent context entries
    async fn context_coherence(
        &self,
        context: &str,
        translation: &str,
    ) -> lingo_core::Result<f64> {
        let Some(scorer) = &self.scorer else {
            return Ok(0.0);
        };

        let entries: Vec<&str> = context.split('|').map(str::trim).collect();
        let recent: Vec<&str> = entries.iter().rev().take(2).copied().collect();
        if recent.is_empty() {
            return Ok(0.0);
        }

        let mut sum = 0.0f64;
        for entry in &recent {
            sum += scorer.similarity(entry, translation).await? as f64;
        }
        let mean = sum / recent.len() as f64;
        Ok(((mean + 0.3) / 0.7).clamp(0.0, 1.0))
    }
}

/// Length-ratio sanity: translations wildly longer or shorter than the
/// source are suspect.
fn length_factor(original: &str, translation: &str) -> f64 {
    let ratio = translation.chars().count() as f64 / original.chars().count().max(1) as f64;
    if (0.3..=3.0).contains(&ratio) {
        (1.0 - (1.0 - ratio).abs() * 0.5).min(1.0)
    } else {
        0.3
    }
}

/// Share of output characters inside the target language's inventory
fn coverage_factor(translation: &str, target: Language) -> f64 {
    if translation.is_empty() {
        return 0.0;
    }

    let expected: std::collections::HashSet<char> = target.expected_charset().chars().collect();
    let chars: std::collections::HashSet<char> = translation.chars().collect();

    let covered = chars.iter().filter(|c| expected.contains(c)).count();
    let total = chars.len();
    let unexpected = total - covered;

    let coverage = covered as f64 / total as f64;
    let penalty = (unexpected as f64 * 0.05).min(0.5);
    (coverage - penalty).max(0.1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[tokio::test]
    async fn test_reasonable_translation_scores_high() {
        let mut quality = QualityFilter::new(None);
        let confidence = quality
            .confidence(
                "hello world how are you",
                "hola mundo cómo estás",
                Language::English,
                Language::Spanish,
                None,
            )
            .await;
        assert!(confidence > 0.6, "got {confidence}");
    }

    #[tokio::test]
    async fn test_repetitive_output_penalized() {
        let mut quality = QualityFilter::new(None);
        let clean = quality
            .confidence(
                "a normal sentence with several words",
                "una frase normal con varias palabras",
                Language::English,
                Language::Spanish,
                None,
            )
            .await;
        let repetitive = quality
            .confidence(
                "a normal sentence with several words",
                "hola hola hola hola hola hola",
                Language::English,
                Language::Spanish,
                None,
            )
            .await;
        assert!(repetitive < clean);
    }

    #[tokio::test]
    async fn test_wrong_charset_penalized() {
        let mut quality = QualityFilter::new(None);
        let covered = quality
            .confidence("good morning", "buenos días", Language::English, Language::Spanish, None)
            .await;
        let uncovered = quality
            .confidence("good morning", "доброе утро", Language::English, Language::Spanish, None)
            .await;
        assert!(uncovered < covered);
    }

    #[tokio::test]
    async fn test_extreme_length_ratio_penalized() {
        let mut quality = QualityFilter::new(None);
        let sane = quality
            .confidence("hello there friend", "hola amigo querido", Language::English, Language::Spanish, None)
            .await;
        let bloated = quality
            .confidence(
                "hi",
                "una traducción absurdamente larga para un saludo tan corto de dos letras",
                Language::English,
                Language::Spanish,
                None,
            )
            .await;
        assert!(bloated < sane);
    }

    #[tokio::test]
    async fn test_confidence_clamped_to_floor() {
        let mut quality = QualityFilter::new(None);
        let confidence = quality
            .confidence("hello", "零零零 零零 零零零 零零 零零零", Language::English, Language::Spanish, None)
            .await;
        assert!(confidence >= 0.1);
        assert!(confidence <= 1.0);
    }

    struct FixedScorer(f32);

    #[async_trait]
    impl SemanticScorer for FixedScorer {
        async fn similarity(&self, _a: &str, _b: &str) -> lingo_core::Result<f32> {
            Ok(self.0)
        }
    }

    #[tokio::test]
    async fn test_semantic_scorer_moves_confidence() {
        let mut with_good = QualityFilter::new(Some(Arc::new(FixedScorer(0.9))));
        let mut with_bad = QualityFilter::new(Some(Arc::new(FixedScorer(-0.2))));

        let good = with_good
            .confidence("hello world", "hola mundo", Language::English, Language::Spanish, None)
            .await;
        let bad = with_bad
            .confidence("hello world", "hola mundo", Language::English, Language::Spanish, None)
            .await;
        assert!(good > bad);
    }

    struct FailingScorer;

    #[async_trait]
    impl SemanticScorer for FailingScorer {
        async fn similarity(&self, _a: &str, _b: &str) -> lingo_core::Result<f32> {
            Err(lingo_core::Error::Translator("scorer offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_failed_scorer_degrades_to_remaining_factors() {
        let mut degraded = QualityFilter::new(Some(Arc::new(FailingScorer)));
        let mut plain = QualityFilter::new(None);

        let a = degraded
            .confidence("hello world", "hola mundo", Language::English, Language::Spanish, None)
            .await;
        let b = plain
            .confidence("hello world", "hola mundo", Language::English, Language::Spanish, None)
            .await;
        assert!((a - b).abs() < 1e-6, "degraded path must equal the scorerless path");
    }
}
