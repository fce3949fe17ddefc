//! Caption types: word candidates, stable words, and caption state
//!
//! A caption is split into a confirmed prefix (append-only, never rewritten)
//! and an interim tail (rewritten on every update). A retraction is any
//! interim word that differs from, or disappears in, the next update at the
//! same position.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::Language;

/// A word as proposed by one recognizer hypothesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordCandidate {
    /// Word text (case-folded, trimmed)
    pub text: String,
    /// Recognizer confidence (0.0 - 1.0)
    pub confidence: f32,
    /// Start offset in the utterance timeline, seconds
    pub start_time: f64,
    /// End offset in the utterance timeline, seconds
    pub end_time: f64,
    /// Word index within the hypothesis
    pub position: usize,
    /// Identifier of the hypothesis that produced this candidate
    pub source_hypothesis: u64,
}

/// A word confirmed by the agreement filter.
///
/// Stable words are emitted downstream exactly once and never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StableWord {
    pub text: String,
    /// Mean confidence over the agreeing candidates
    pub confidence: f32,
    /// Mean start offset, seconds
    pub start_time: f64,
    /// Mean end offset, seconds
    pub end_time: f64,
    /// Position of the group's anchor candidate
    pub position: usize,
    /// Number of hypotheses that agreed
    pub agreement_count: usize,
    /// Earliest start offset seen for this word, seconds
    pub first_seen: f64,
    /// Wall-clock confirmation time, Unix epoch milliseconds
    pub confirmed_at_ms: u64,
}

/// One caption emission from the STT stage.
///
/// Carries the full interim tail plus any words newly confirmed by this
/// update. Interim words must not be persisted downstream.
#[derive(Debug, Clone)]
pub struct CaptionUpdate {
    /// Session this caption belongs to
    pub session_id: String,
    /// Monotonic update number within the session
    pub sequence: u64,
    /// Current interim tail (may be rewritten by the next update)
    pub interim: Vec<WordCandidate>,
    /// Words confirmed by this update, in position order
    pub newly_confirmed: Vec<StableWord>,
    /// Convenience flag: `!newly_confirmed.is_empty()`
    pub has_new_confirmations: bool,
    /// Source language, when the recognizer reports one
    pub detected_language: Option<Language>,
    /// Capture timestamp of the newest audio frame that fed this update
    pub frame_captured_at: Instant,
    /// Capture timestamp of the first frame of the current utterance;
    /// anchors time-to-first-token measurement downstream
    pub utterance_started_at: Instant,
    /// Set on the last update of an utterance or session (relaxed finalize)
    pub is_final: bool,
}

impl CaptionUpdate {
    /// Interim tail as plain text
    pub fn interim_text(&self) -> String {
        join_words(self.interim.iter().map(|w| w.text.as_str()))
    }

    /// Newly confirmed words as plain text
    pub fn confirmed_text(&self) -> String {
        join_words(self.newly_confirmed.iter().map(|w| w.text.as_str()))
    }
}

fn join_words<'a>(words: impl Iterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for word in words {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Accumulated caption state for one session.
///
/// Applies `CaptionUpdate`s, growing the confirmed prefix and replacing the
/// interim tail, while counting retractions between consecutive tails.
#[derive(Debug, Default)]
pub struct Caption {
    confirmed: Vec<StableWord>,
    interim: Vec<String>,
    retractions: u64,
    interim_words_emitted: u64,
}

impl Caption {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an update; returns the number of retractions it caused.
    ///
    /// A retraction is a position where the previous interim word differs
    /// from the new one, or where the new tail no longer has a word at all.
    pub fn apply(&mut self, update: &CaptionUpdate) -> u64 {
        self.confirmed.extend(update.newly_confirmed.iter().cloned());

        // Confirmed words leave the tail; only compare the part that is
        // still interim.
        let new_tail: Vec<String> = update.interim.iter().map(|w| w.text.clone()).collect();
        let skip = update.newly_confirmed.len().min(self.interim.len());

        let mut retracted = 0u64;
        for (i, prev) in self.interim.iter().skip(skip).enumerate() {
            match new_tail.get(i) {
                Some(next) if next == prev => {},
                // Changed at this position, or the tail got shorter
                _ => retracted += 1,
            }
        }

        self.interim = new_tail;
        self.interim_words_emitted += self.interim.len() as u64;
        self.retractions += retracted;
        retracted
    }

    /// The append-only confirmed prefix
    pub fn confirmed(&self) -> &[StableWord] {
        &self.confirmed
    }

    /// The current interim tail
    pub fn interim(&self) -> &[String] {
        &self.interim
    }

    /// Total retractions observed for this session
    pub fn retractions(&self) -> u64 {
        self.retractions
    }

    /// Total interim words emitted (denominator for retraction rate)
    pub fn words_emitted(&self) -> u64 {
        self.interim_words_emitted
    }

    /// Full text: confirmed prefix followed by interim tail
    pub fn full_text(&self) -> String {
        let mut parts: Vec<&str> = self.confirmed.iter().map(|w| w.text.as_str()).collect();
        parts.extend(self.interim.iter().map(|s| s.as_str()));
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(text: &str, position: usize) -> WordCandidate {
        WordCandidate {
            text: text.to_string(),
            confidence: 0.9,
            start_time: position as f64 * 0.3,
            end_time: position as f64 * 0.3 + 0.25,
            position,
            source_hypothesis: 1,
        }
    }

    fn update(interim: &[&str], confirmed: &[&str]) -> CaptionUpdate {
        let newly_confirmed: Vec<StableWord> = confirmed
            .iter()
            .enumerate()
            .map(|(i, text)| StableWord {
                text: text.to_string(),
                confidence: 0.9,
                start_time: 0.0,
                end_time: 0.0,
                position: i,
                agreement_count: 2,
                first_seen: 0.0,
                confirmed_at_ms: 0,
            })
            .collect();
        CaptionUpdate {
            session_id: "s1".to_string(),
            sequence: 0,
            interim: interim.iter().enumerate().map(|(i, t)| candidate(t, i)).collect(),
            has_new_confirmations: !newly_confirmed.is_empty(),
            newly_confirmed,
            detected_language: None,
            frame_captured_at: Instant::now(),
            utterance_started_at: Instant::now(),
            is_final: false,
        }
    }

    #[test]
    fn test_confirmed_prefix_is_append_only() {
        let mut caption = Caption::new();
        caption.apply(&update(&["world"], &["hello"]));
        caption.apply(&update(&[], &["world"]));

        let texts: Vec<&str> = caption.confirmed().iter().map(|w| w.text.as_str()).collect();
        assert_eq!(texts, vec!["hello", "world"]);
    }

    #[test]
    fn test_changed_interim_word_is_a_retraction() {
        let mut caption = Caption::new();
        assert_eq!(caption.apply(&update(&["hello", "wold"], &[])), 0);
        assert_eq!(caption.apply(&update(&["hello", "world"], &[])), 1);
        assert_eq!(caption.retractions(), 1);
    }

    #[test]
    fn test_disappearing_interim_word_is_a_retraction() {
        let mut caption = Caption::new();
        caption.apply(&update(&["the", "quick", "brown"], &[]));
        // Tail shrinks by two words without any confirmation
        let retracted = caption.apply(&update(&["the"], &[]));
        assert_eq!(retracted, 2);
    }

    #[test]
    fn test_confirmation_does_not_count_as_retraction() {
        let mut caption = Caption::new();
        caption.apply(&update(&["hello", "world"], &[]));
        // "hello" moves to the confirmed prefix, tail keeps "world"
        let retracted = caption.apply(&update(&["world"], &["hello"]));
        assert_eq!(retracted, 0);
    }

    #[test]
    fn test_full_text() {
        let mut caption = Caption::new();
        caption.apply(&update(&["brown"], &["the", "quick"]));
        assert_eq!(caption.full_text(), "the quick brown");
    }
}
