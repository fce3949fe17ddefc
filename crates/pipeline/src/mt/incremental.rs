//! Incremental translation control
//!
//! Decides whether a partial caption is worth a model call or can be served
//! from the cached previous translation, and extracts the new part of a
//! context-prefixed translation output.

use std::time::{Duration, Instant};

/// Per-(session, target) incremental update state
#[derive(Debug)]
pub struct IncrementalController {
    current_text: String,
    word_count: usize,
    last_translation: Option<String>,
    last_translation_at: Option<Instant>,
    /// Completed sentence translations for this session
    completed: Vec<String>,
}

impl IncrementalController {
    pub fn new() -> Self {
        Self {
            current_text: String::new(),
            word_count: 0,
            last_translation: None,
            last_translation_at: None,
            completed: Vec::new(),
        }
    }

    /// Decide whether to retranslate a partial segment.
    ///
    /// Translates when any of: this is the first partial, a new word
    /// appeared, the text changed beyond appending (case-folded,
    /// whitespace-normalized comparison), or the minimum interval elapsed.
    /// When this returns false the cached translation should be reused.
    pub fn should_translate(&mut self, text_now: &str, min_interval: Duration) -> bool {
        let normalized_now = normalize(text_now);
        let normalized_prev = normalize(&self.current_text);
        let word_count = normalized_now.split_whitespace().count();

        let should = normalized_prev.is_empty()
            || word_count > self.word_count
            || !normalized_now.starts_with(&normalized_prev)
            || self
                .last_translation_at
                .map(|at| at.elapsed() > min_interval)
                .unwrap_or(true);

        if should {
            self.current_text = text_now.to_string();
            self.word_count = word_count;
        }
        should
    }

    /// Cached translation for reuse when `should_translate` declines
    pub fn cached(&self) -> Option<&str> {
        self.last_translation.as_deref()
    }

    /// Record a successful translation of the current segment
    pub fn record_translation(&mut self, translation: &str) {
        self.last_translation = Some(translation.to_string());
        self.last_translation_at = Some(Instant::now());
    }

    /// Mark the current segment complete; partial state resets
    pub fn finalize(&mut self, final_translation: &str) {
        self.completed.push(final_translation.to_string());
        self.current_text.clear();
        self.word_count = 0;
        self.last_translation = None;
        self.last_translation_at = None;
    }

    /// Completed sentence translations, oldest first
    pub fn history(&self) -> &[String] {
        &self.completed
    }

    pub fn clear(&mut self) {
        self.current_text.clear();
        self.word_count = 0;
        self.last_translation = None;
        self.last_translation_at = None;
        self.completed.clear();
    }
}

impl Default for IncrementalController {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Extract the newly translated part of a context-prefixed output.
///
/// Takes the last sentence when sentence-terminal punctuation is present;
/// otherwise falls back to the trailing substring whose length matches the
/// new text's share of the input. The fallback can silently truncate, so it
/// is reported as uncertain and callers cap the result's confidence.
pub fn extract_new_translation(full: &str, context: &str, new_text: &str) -> (String, bool) {
    let sentences = split_sentences(full);
    if sentences.len() > 1 {
        return (sentences.last().unwrap().trim().to_string(), false);
    }

    let total = context.chars().count() + new_text.chars().count();
    if total == 0 {
        return (full.trim().to_string(), false);
    }
    let ratio = new_text.chars().count() as f64 / total as f64;

    let chars: Vec<char> = full.chars().collect();
    let split_point = ((chars.len() as f64) * (1.0 - ratio)) as usize;
    let tail: String = chars[split_point.min(chars.len())..].iter().collect();
    (tail.trim().to_string(), true)
}

/// Split on sentence-terminal punctuation followed by whitespace
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some((_, next)) = chars.peek() {
                if next.is_whitespace() {
                    sentences.push(text[start..=i].trim());
                    start = i + c.len_utf8();
                }
            }
        }
    }
    if start < text.len() {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_partial_translates() {
        let mut controller = IncrementalController::new();
        assert!(controller.should_translate("I am", Duration::from_millis(500)));
    }

    #[test]
    fn test_identical_partial_within_interval_reuses_cache() {
        let mut controller = IncrementalController::new();
        assert!(controller.should_translate("I am", Duration::from_millis(500)));
        controller.record_translation("estoy");

        // Identical text, well within the interval: no model call
        assert!(!controller.should_translate("I am", Duration::from_millis(500)));
        assert_eq!(controller.cached(), Some("estoy"));
    }

    #[test]
    fn test_new_word_triggers_translation() {
        let mut controller = IncrementalController::new();
        controller.should_translate("I am", Duration::from_millis(500));
        controller.record_translation("estoy");
        assert!(controller.should_translate("I am here", Duration::from_millis(500)));
    }

    #[test]
    fn test_non_prefix_change_triggers_translation() {
        let mut controller = IncrementalController::new();
        controller.should_translate("I am", Duration::from_millis(500));
        controller.record_translation("estoy");
        assert!(controller.should_translate("I was", Duration::from_millis(500)));
    }

    #[test]
    fn test_case_and_whitespace_differences_are_not_changes() {
        let mut controller = IncrementalController::new();
        controller.should_translate("I am", Duration::from_millis(500));
        controller.record_translation("estoy");
        // Same words modulo case and spacing: still a cache hit
        assert!(!controller.should_translate("i  AM", Duration::from_millis(500)));
    }

    #[test]
    fn test_interval_elapse_triggers_translation() {
        let mut controller = IncrementalController::new();
        controller.should_translate("I am", Duration::from_millis(500));
        controller.record_translation("estoy");
        assert!(controller.should_translate("I am", Duration::from_millis(0)));
    }

    #[test]
    fn test_finalize_resets_partial_state() {
        let mut controller = IncrementalController::new();
        controller.should_translate("hello world", Duration::from_millis(500));
        controller.record_translation("hola mundo");
        controller.finalize("hola mundo");

        assert_eq!(controller.history(), &["hola mundo".to_string()]);
        assert!(controller.cached().is_none());
        // Next partial is "first" again
        assert!(controller.should_translate("hello", Duration::from_millis(500)));
    }

    #[test]
    fn test_extract_last_sentence() {
        let (extracted, uncertain) =
            extract_new_translation("Hola mundo. Buenos días.", "hello world | Hola mundo", "good morning");
        assert_eq!(extracted, "Buenos días.");
        assert!(!uncertain);
    }

    #[test]
    fn test_extract_without_punctuation_is_uncertain() {
        // No sentence boundary: trailing substring by length ratio, flagged
        let (extracted, uncertain) =
            extract_new_translation("hola mundo buenos días", "hello world", "good morning");
        assert!(uncertain);
        assert!(!extracted.is_empty());
        assert!("hola mundo buenos días".ends_with(&extracted));
    }

    #[test]
    fn test_extract_with_empty_context() {
        let (extracted, uncertain) = extract_new_translation("Hola mundo", "", "hello world");
        assert!(!uncertain || extracted == "Hola mundo");
    }

    #[test]
    fn test_split_sentences() {
        assert_eq!(split_sentences("One. Two! Three?"), vec!["One.", "Two!", "Three?"]);
        assert_eq!(split_sentences("No boundary here"), vec!["No boundary here"]);
        // Decimal points are not sentence boundaries
        assert_eq!(split_sentences("pi is 3.14 roughly"), vec!["pi is 3.14 roughly"]);
    }
}
