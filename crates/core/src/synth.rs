//! Synthesized audio chunk types

use std::sync::Arc;

use crate::SampleRate;

/// One chunk of synthesized speech.
///
/// Chunks stream out of the TTS stage as they are generated; the first chunk
/// of each translation carries `is_first_audio` and stamps time-to-first-token.
/// A final chunk with empty samples and `is_final` marks end-of-utterance.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Arc<[f32]>,
    pub sample_rate: SampleRate,
    /// Chunk index within one synthesized utterance
    pub sequence: u32,
    /// First audible chunk for this translation
    pub is_first_audio: bool,
    /// End-of-utterance marker (samples are empty)
    pub is_final: bool,
    /// Engine that produced this chunk, for metric attribution
    pub engine: String,
}

impl AudioChunk {
    pub fn duration_ms(&self) -> u64 {
        (self.samples.len() as u64 * 1000) / self.sample_rate.as_u32() as u64
    }

    /// Terminal marker chunk
    pub fn final_marker(sample_rate: SampleRate, sequence: u32, engine: &str) -> Self {
        Self {
            samples: Vec::new().into(),
            sample_rate,
            sequence,
            is_first_audio: false,
            is_final: true,
            engine: engine.to_string(),
        }
    }

    /// A chunk of silence, used as the failure marker before `is_final`
    pub fn silence(sample_rate: SampleRate, duration_ms: u32, engine: &str) -> Self {
        let samples = vec![0.0f32; sample_rate.samples_for_ms(duration_ms)];
        Self {
            samples: samples.into(),
            sample_rate,
            sequence: 0,
            is_first_audio: false,
            is_final: false,
            engine: engine.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration() {
        let chunk = AudioChunk::silence(SampleRate::Hz16000, 100, "test");
        assert_eq!(chunk.samples.len(), 1600);
        assert_eq!(chunk.duration_ms(), 100);
    }

    #[test]
    fn test_final_marker_is_empty() {
        let chunk = AudioChunk::final_marker(SampleRate::Hz22050, 3, "test");
        assert!(chunk.is_final);
        assert!(chunk.samples.is_empty());
        assert_eq!(chunk.sequence, 3);
    }
}
