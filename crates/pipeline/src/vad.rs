//! Voice activity detection
//!
//! The framer tags every frame with a speech probability; the STT stage
//! feeds those tags into an utterance tracker whose state machine decides
//! when an utterance opens and closes. The energy detector is the
//! always-available engine; model-backed detectors plug in behind the same
//! trait and degrade to energy scoring on failure.

use lingo_core::{calculate_energy_db, Result, SampleRate};

/// VAD engine trait for pluggable implementations
pub trait VadEngine: Send + Sync {
    /// Speech probability (0.0 - 1.0) for one frame of mono samples
    fn score(&self, samples: &[f32], sample_rate: SampleRate) -> Result<f32>;

    /// Engine name for logging
    fn name(&self) -> &str;
}

/// Energy-based voice activity detector.
///
/// Maps RMS energy onto [0, 1] between a silence floor and a nominal speech
/// ceiling. Crude, but it has no model to load and never fails, which is
/// exactly what the degraded path needs.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// Energy at or below this is certain silence
    pub floor_db: f32,
    /// Energy at or above this is certain speech
    pub ceiling_db: f32,
}

impl EnergyVad {
    pub fn new(floor_db: f32) -> Self {
        Self {
            floor_db,
            ceiling_db: -20.0,
        }
    }

    /// Probability for a precomputed energy value
    pub fn score_energy(&self, energy_db: f32) -> f32 {
        if energy_db <= self.floor_db {
            return 0.0;
        }
        if energy_db >= self.ceiling_db {
            return 1.0;
        }
        (energy_db - self.floor_db) / (self.ceiling_db - self.floor_db)
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(-55.0)
    }
}

impl VadEngine for EnergyVad {
    fn score(&self, samples: &[f32], _sample_rate: SampleRate) -> Result<f32> {
        Ok(self.score_energy(calculate_energy_db(samples)))
    }

    fn name(&self) -> &str {
        "energy"
    }
}

/// Utterance segmentation states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UtteranceState {
    /// No speech detected
    #[default]
    Silence,
    /// Potential speech start (accumulating)
    SpeechStart,
    /// Active speech confirmed
    Speech,
    /// Accumulating trailing silence
    SpeechEnd,
}

/// Per-session utterance boundary tracker.
///
/// Debounces frame-level VAD decisions: `min_speech_frames` consecutive
/// speech frames open an utterance, `min_silence_frames` consecutive
/// non-speech frames close it.
#[derive(Debug)]
pub struct UtteranceTracker {
    state: UtteranceState,
    speech_frames: usize,
    silence_frames: usize,
    min_speech_frames: usize,
    min_silence_frames: usize,
}

/// Boundary events reported by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UtteranceEvent {
    None,
    /// Utterance opened with this frame
    Started,
    /// Utterance closed before this frame
    Ended,
}

impl UtteranceTracker {
    pub fn new(min_speech_frames: usize, min_silence_frames: usize) -> Self {
        Self {
            state: UtteranceState::Silence,
            speech_frames: 0,
            silence_frames: 0,
            min_speech_frames: min_speech_frames.max(1),
            min_silence_frames: min_silence_frames.max(1),
        }
    }

    pub fn state(&self) -> UtteranceState {
        self.state
    }

    pub fn in_utterance(&self) -> bool {
        matches!(self.state, UtteranceState::Speech | UtteranceState::SpeechEnd)
            || self.state == UtteranceState::SpeechStart
    }

    /// Advance the state machine with one frame's VAD decision
    pub fn update(&mut self, has_speech: bool) -> UtteranceEvent {
        match (self.state, has_speech) {
            (UtteranceState::Silence, true) => {
                self.speech_frames = 1;
                if self.speech_frames >= self.min_speech_frames {
                    self.state = UtteranceState::Speech;
                    UtteranceEvent::Started
                } else {
                    self.state = UtteranceState::SpeechStart;
                    UtteranceEvent::None
                }
            },
            (UtteranceState::Silence, false) => UtteranceEvent::None,
            (UtteranceState::SpeechStart, true) => {
                self.speech_frames += 1;
                if self.speech_frames >= self.min_speech_frames {
                    self.state = UtteranceState::Speech;
                    UtteranceEvent::Started
                } else {
                    UtteranceEvent::None
                }
            },
            (UtteranceState::SpeechStart, false) => {
                self.state = UtteranceState::Silence;
                self.speech_frames = 0;
                UtteranceEvent::None
            },
            (UtteranceState::Speech, true) => UtteranceEvent::None,
            (UtteranceState::Speech, false) => {
                self.silence_frames = 1;
                if self.silence_frames >= self.min_silence_frames {
                    self.reset();
                    UtteranceEvent::Ended
                } else {
                    self.state = UtteranceState::SpeechEnd;
                    UtteranceEvent::None
                }
            },
            (UtteranceState::SpeechEnd, true) => {
                self.state = UtteranceState::Speech;
                self.silence_frames = 0;
                UtteranceEvent::None
            },
            (UtteranceState::SpeechEnd, false) => {
                self.silence_frames += 1;
                if self.silence_frames >= self.min_silence_frames {
                    self.reset();
                    UtteranceEvent::Ended
                } else {
                    UtteranceEvent::None
                }
            },
        }
    }

    pub fn reset(&mut self) {
        self.state = UtteranceState::Silence;
        self.speech_frames = 0;
        self.silence_frames = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_vad_silence() {
        let vad = EnergyVad::default();
        let silence = vec![0.0f32; 160];
        assert_eq!(vad.score(&silence, SampleRate::Hz16000).unwrap(), 0.0);
    }

    #[test]
    fn test_energy_vad_speech() {
        let vad = EnergyVad::default();
        let loud = vec![0.5f32; 160];
        let prob = vad.score(&loud, SampleRate::Hz16000).unwrap();
        assert!(prob > 0.9, "got {prob}");
    }

    #[test]
    fn test_tracker_opens_and_closes() {
        let mut tracker = UtteranceTracker::new(1, 2);

        assert_eq!(tracker.update(true), UtteranceEvent::Started);
        assert_eq!(tracker.state(), UtteranceState::Speech);

        // One silence frame is not enough to close
        assert_eq!(tracker.update(false), UtteranceEvent::None);
        assert_eq!(tracker.update(false), UtteranceEvent::Ended);
        assert_eq!(tracker.state(), UtteranceState::Silence);
    }

    #[test]
    fn test_tracker_speech_resumes_during_trailing_silence() {
        let mut tracker = UtteranceTracker::new(1, 3);
        tracker.update(true);
        tracker.update(false);
        tracker.update(false);
        // Speech resumes before the silence quorum
        assert_eq!(tracker.update(true), UtteranceEvent::None);
        assert_eq!(tracker.state(), UtteranceState::Speech);
    }

    #[test]
    fn test_tracker_requires_speech_quorum() {
        let mut tracker = UtteranceTracker::new(2, 2);
        assert_eq!(tracker.update(true), UtteranceEvent::None);
        assert_eq!(tracker.state(), UtteranceState::SpeechStart);
        assert_eq!(tracker.update(true), UtteranceEvent::Started);
    }
}
