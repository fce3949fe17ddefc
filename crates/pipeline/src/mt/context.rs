//! Rolling translation context
//!
//! A bounded window of prior (source, translation) sentence pairs, prepended
//! to MT input for discourse coherence. Bounded by both a sentence count and
//! an estimated token count; the eldest pair is evicted when either bound is
//! exceeded.

use std::collections::VecDeque;
use unicode_segmentation::UnicodeSegmentation;

/// Per-(session, target) context buffer
#[derive(Debug)]
pub struct ContextBuffer {
    entries: VecDeque<(String, String)>,
    max_sentences: usize,
    max_tokens: usize,
}

impl ContextBuffer {
    pub fn new(max_sentences: usize, max_tokens: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_sentences: max_sentences.max(1),
            max_tokens: max_tokens.max(1),
        }
    }

    /// Current context as a single string of `source | translation` entries
    pub fn snapshot(&self) -> String {
        self.entries
            .iter()
            .map(|(source, translation)| format!("{source} | {translation}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Record a completed sentence pair, evicting the eldest entries while
    /// either bound is exceeded.
    pub fn push(&mut self, source: impl Into<String>, translation: impl Into<String>) {
        self.entries.push_back((source.into(), translation.into()));
        self.evict();
    }

    /// Record a sentence pair that may extend the previous one.
    ///
    /// When a sentence grows across utterance boundaries ("the quick brown"
    /// then "the quick brown fox"), the grown sentence replaces its stale
    /// prefix entry instead of duplicating it.
    pub fn push_or_extend(&mut self, source: &str, translation: &str) {
        if let Some((last_source, _)) = self.entries.back() {
            let folded = source.to_lowercase();
            if folded.starts_with(&last_source.to_lowercase()) && folded != last_source.to_lowercase()
            {
                self.entries.pop_back();
            }
        }
        self.push(source.to_string(), translation.to_string());
    }

    fn evict(&mut self) {
        while self.entries.len() > self.max_sentences {
            self.entries.pop_front();
        }
        while self.token_count() > self.max_tokens && self.entries.len() > 1 {
            self.entries.pop_front();
        }
        // A single oversized entry still violates the token bound; trim it
        // rather than keep an unbounded string.
        if self.token_count() > self.max_tokens {
            if let Some((source, translation)) = self.entries.pop_front() {
                let budget = self.max_tokens / 2;
                self.entries
                    .push_front((tail_tokens(&source, budget), tail_tokens(&translation, budget)));
            }
        }
    }

    /// Estimated token count of the current snapshot
    pub fn token_count(&self) -> usize {
        self.entries
            .iter()
            .map(|(source, translation)| {
                source.unicode_words().count() + translation.unicode_words().count()
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entries, eldest first
    pub fn entries(&self) -> impl Iterator<Item = &(String, String)> {
        self.entries.iter()
    }
}

fn tail_tokens(text: &str, count: usize) -> String {
    let words: Vec<&str> = text.unicode_words().collect();
    if words.len() <= count {
        return text.to_string();
    }
    words[words.len() - count..].join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_format() {
        let mut ctx = ContextBuffer::new(3, 512);
        ctx.push("hello world", "hola mundo");
        ctx.push("good morning", "buenos días");
        assert_eq!(
            ctx.snapshot(),
            "hello world | hola mundo good morning | buenos días"
        );
    }

    #[test]
    fn test_sentence_bound() {
        let mut ctx = ContextBuffer::new(3, 512);
        for i in 0..5 {
            ctx.push(format!("source {i}"), format!("target {i}"));
        }
        assert_eq!(ctx.len(), 3);
        // Eldest entries evicted
        assert!(ctx.snapshot().contains("source 4"));
        assert!(!ctx.snapshot().contains("source 0"));
    }

    #[test]
    fn test_token_bound() {
        let mut ctx = ContextBuffer::new(10, 12);
        ctx.push("one two three", "uno dos tres"); // 6 tokens
        ctx.push("four five six", "cuatro cinco seis"); // 6 tokens
        ctx.push("seven eight", "siete ocho"); // over budget
        assert!(ctx.token_count() <= 12);
        assert!(!ctx.snapshot().contains("one"));
    }

    #[test]
    fn test_single_oversized_entry_trimmed() {
        let mut ctx = ContextBuffer::new(3, 8);
        let long: String = (0..50).map(|i| format!("w{i} ")).collect();
        ctx.push(long.trim().to_string(), "t".to_string());
        assert!(ctx.token_count() <= 8);
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_push_or_extend_replaces_prefix_entry() {
        let mut ctx = ContextBuffer::new(3, 512);
        ctx.push_or_extend("the quick brown", "tr1");
        ctx.push_or_extend("the quick brown fox", "tr2");

        assert_eq!(ctx.len(), 1);
        let snapshot = ctx.snapshot();
        assert!(snapshot.contains("the quick brown fox | tr2"));
        assert!(!snapshot.contains("tr1"));
    }

    #[test]
    fn test_push_or_extend_keeps_unrelated_entries() {
        let mut ctx = ContextBuffer::new(3, 512);
        ctx.push_or_extend("hello world", "hola mundo");
        ctx.push_or_extend("something else", "otra cosa");
        assert_eq!(ctx.len(), 2);
    }
}
