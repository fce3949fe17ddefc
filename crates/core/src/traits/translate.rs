//! Translation traits

use async_trait::async_trait;

use crate::{Language, Result};

/// Machine translation interface.
///
/// Takes the already-assembled input (context prepended by the MT stage) and
/// returns raw translated text; context extraction and confidence scoring
/// happen in the stage, not the backend.
#[async_trait]
pub trait Translator: Send + Sync + 'static {
    /// Translate `text` from `source` to `target`
    async fn translate(&self, text: &str, source: Language, target: Language) -> Result<String>;

    /// Does this backend handle the pair?
    fn supports(&self, source: Language, target: Language) -> bool;

    /// Model identifier for logging and metric attribution
    fn model_id(&self) -> &str;
}

/// Optional cross-lingual semantic similarity scorer.
///
/// When absent, the MT quality filter degrades to its remaining factors.
#[async_trait]
pub trait SemanticScorer: Send + Sync + 'static {
    /// Similarity of two texts in [0.0, 1.0]
    async fn similarity(&self, original: &str, translation: &str) -> Result<f32>;
}
