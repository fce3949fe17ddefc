//! LocalAgreement-2 word stabilization
//!
//! Minimizes caption retractions by requiring a word to appear in K
//! agreeing hypotheses (across a rolling window of W) before it is
//! confirmed. Two occurrences agree when their case-folded texts are
//! identical and their positions differ by at most the configured drift.
//! Agreements must come from distinct hypotheses; a word repeated inside
//! one hypothesis counts once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;

use lingo_core::{epoch_ms, RecognizedWord, StableWord, WordCandidate};
use lingo_config::AgreementConfig;

const CLEANUP_INTERVAL_SECS: u64 = 5;

/// Word stability filter for streaming STT
pub struct LocalAgreement {
    threshold: usize,
    stability_window: usize,
    confidence_threshold: f32,
    max_position_drift: usize,
    /// Confirmed words older than ten times this are garbage-collected
    temporal_window_ms: u64,

    confirmed: Vec<StableWord>,
    history: VecDeque<Vec<WordCandidate>>,
    hypothesis_counter: u64,
    last_cleanup: Instant,

    total_candidates: u64,
    total_confirmed: u64,
}

/// Output of one stabilizer pass
#[derive(Debug, Default)]
pub struct AgreementOutcome {
    /// Current interim tail (this hypothesis' filtered candidates)
    pub interim: Vec<WordCandidate>,
    /// Words that just reached quorum, in position order
    pub newly_confirmed: Vec<StableWord>,
}

impl LocalAgreement {
    pub fn new(config: &AgreementConfig) -> Self {
        Self {
            threshold: config.threshold.max(1),
            stability_window: config.stability_window.max(1),
            confidence_threshold: config.confidence_threshold,
            max_position_drift: config.max_position_drift,
            temporal_window_ms: config.temporal_window_ms,
            confirmed: Vec::new(),
            history: VecDeque::new(),
            hypothesis_counter: 0,
            last_cleanup: Instant::now(),
            total_candidates: 0,
            total_confirmed: 0,
        }
    }

    /// Process one recognizer hypothesis
    pub fn process_hypothesis(&mut self, words: &[RecognizedWord]) -> AgreementOutcome {
        self.hypothesis_counter += 1;
        let hypothesis_id = self.hypothesis_counter;

        let candidates: Vec<WordCandidate> = words
            .iter()
            .enumerate()
            .filter(|(_, w)| w.confidence >= self.confidence_threshold)
            .map(|(position, w)| WordCandidate {
                text: w.text.trim().to_lowercase(),
                confidence: w.confidence,
                start_time: w.start_time,
                end_time: w.end_time,
                position,
                source_hypothesis: hypothesis_id,
            })
            .filter(|c| !c.text.is_empty())
            .collect();

        self.total_candidates += candidates.len() as u64;
        self.history.push_back(candidates.clone());
        while self.history.len() > self.stability_window {
            self.history.pop_front();
        }

        let newly_confirmed = self.find_stable_words(self.threshold);
        self.total_confirmed += newly_confirmed.len() as u64;

        if self.last_cleanup.elapsed().as_secs() >= CLEANUP_INTERVAL_SECS {
            self.cleanup_old_confirmations();
            self.last_cleanup = Instant::now();
        }

        tracing::trace!(
            words = words.len(),
            confirmed = newly_confirmed.len(),
            "Stabilizer processed hypothesis"
        );

        // The interim tail is what remains tentative: candidates whose
        // (text, position) has already been confirmed leave the tail.
        let interim = candidates
            .into_iter()
            .filter(|c| !self.is_already_confirmed(&c.text, c.position))
            .collect();

        AgreementOutcome {
            interim,
            newly_confirmed,
        }
    }

    /// Finalize the utterance with a relaxed threshold (K-1, minimum 1),
    /// emitting trailing words that never reached the full quorum.
    pub fn finalize(&mut self) -> Vec<StableWord> {
        let relaxed = self.threshold.saturating_sub(1).max(1);
        let final_words = self.find_stable_words(relaxed);
        self.total_confirmed += final_words.len() as u64;
        tracing::debug!(count = final_words.len(), "Stabilizer finalized");
        final_words
    }

    /// Reset all state (new utterance)
    pub fn reset(&mut self) {
        self.confirmed.clear();
        self.history.clear();
        self.hypothesis_counter = 0;
    }

    /// Confirmed words in position order
    pub fn confirmed_words(&self) -> Vec<&StableWord> {
        let mut words: Vec<&StableWord> = self.confirmed.iter().collect();
        words.sort_by_key(|w| w.position);
        words
    }

    /// (candidates seen, words confirmed) since construction
    pub fn stats(&self) -> (u64, u64) {
        (self.total_candidates, self.total_confirmed)
    }

    fn find_stable_words(&mut self, threshold: usize) -> Vec<StableWord> {
        if self.history.len() < threshold {
            return Vec::new();
        }

        let mut newly_confirmed = Vec::new();
        let now_ms = epoch_ms();

        for (text, position_groups) in self.group_candidates() {
            for group in position_groups {
                // Agreement counts distinct hypotheses, not raw occurrences
                let distinct: HashSet<u64> = group.iter().map(|c| c.source_hypothesis).collect();
                if distinct.len() < threshold {
                    continue;
                }

                let anchor_position = group[0].position;
                if self.is_already_confirmed(&text, anchor_position) {
                    continue;
                }

                let n = group.len() as f64;
                let stable = StableWord {
                    text: text.clone(),
                    confidence: (group.iter().map(|c| c.confidence as f64).sum::<f64>() / n) as f32,
                    start_time: group.iter().map(|c| c.start_time).sum::<f64>() / n,
                    end_time: group.iter().map(|c| c.end_time).sum::<f64>() / n,
                    position: anchor_position,
                    agreement_count: distinct.len(),
                    first_seen: group
                        .iter()
                        .map(|c| c.start_time)
                        .fold(f64::INFINITY, f64::min),
                    confirmed_at_ms: now_ms,
                };

                self.confirmed.push(stable.clone());
                newly_confirmed.push(stable);
            }
        }

        newly_confirmed.sort_by_key(|w| w.position);
        newly_confirmed
    }

    /// Group all windowed candidates by text, then into position groups
    /// where every member is within drift of some other member.
    fn group_candidates(&self) -> HashMap<String, Vec<Vec<WordCandidate>>> {
        let mut by_word: HashMap<String, Vec<WordCandidate>> = HashMap::new();
        for hypothesis in &self.history {
            for candidate in hypothesis {
                by_word
                    .entry(candidate.text.clone())
                    .or_default()
                    .push(candidate.clone());
            }
        }

        let mut groups = HashMap::new();
        for (text, candidates) in by_word {
            let mut position_groups: Vec<Vec<WordCandidate>> = Vec::new();

            for candidate in candidates {
                let slot = position_groups.iter_mut().find(|group| {
                    group.iter().any(|c| {
                        candidate.position.abs_diff(c.position) <= self.max_position_drift
                    })
                });
                match slot {
                    Some(group) => group.push(candidate),
                    None => position_groups.push(vec![candidate]),
                }
            }

            groups.insert(text, position_groups);
        }
        groups
    }

    fn is_already_confirmed(&self, text: &str, position: usize) -> bool {
        self.confirmed.iter().any(|w| {
            w.text == text && w.position.abs_diff(position) <= self.max_position_drift
        })
    }

    fn cleanup_old_confirmations(&mut self) {
        let cutoff = epoch_ms().saturating_sub(self.temporal_window_ms * 10);
        let before = self.confirmed.len();
        self.confirmed.retain(|w| w.confirmed_at_ms > cutoff);
        let cleaned = before - self.confirmed.len();
        if cleaned > 0 {
            tracing::debug!(cleaned, "Garbage-collected old confirmed words");
        }
    }
}
