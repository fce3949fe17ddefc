//! Audio frame types and utilities

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Supported audio sample rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    Hz8000,
    /// 16kHz - Standard speech recognition
    #[default]
    Hz16000,
    /// 22.05kHz - TTS output
    Hz22050,
    /// 24kHz - TTS output (neural vocoders)
    Hz24000,
    /// 44.1kHz - CD quality
    Hz44100,
    /// 48kHz - Professional audio
    Hz48000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz22050 => 22050,
            SampleRate::Hz24000 => 24000,
            SampleRate::Hz44100 => 44100,
            SampleRate::Hz48000 => 48000,
        }
    }

    /// Map a rate in Hz onto the supported set
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            8000 => Some(SampleRate::Hz8000),
            16000 => Some(SampleRate::Hz16000),
            22050 => Some(SampleRate::Hz22050),
            24000 => Some(SampleRate::Hz24000),
            44100 => Some(SampleRate::Hz44100),
            48000 => Some(SampleRate::Hz48000),
            _ => None,
        }
    }

    /// Get samples per millisecond
    pub fn samples_per_ms(&self) -> usize {
        self.as_u32() as usize / 1000
    }

    /// Number of samples in a span of `ms` milliseconds
    pub fn samples_for_ms(&self, ms: u32) -> usize {
        self.as_u32() as usize * ms as usize / 1000
    }
}

/// Minimum representable energy, treated as silence
pub const SILENCE_DB: f32 = -96.0;

/// PCM16 normalization constant
const PCM16_NORMALIZE: f32 = 32768.0;
/// PCM16 scaling constant
const PCM16_SCALE: f32 = 32767.0;

/// A fixed-duration slice of mono audio flowing through the pipeline.
///
/// Samples are stored as f32 normalized to [-1.0, 1.0]. Frames are immutable
/// after production; ownership moves with the frame through the channels.
#[derive(Clone)]
pub struct AudioFrame {
    /// Raw audio samples (f32, mono)
    pub samples: Arc<[f32]>,
    /// Sample rate
    pub sample_rate: SampleRate,
    /// Frame sequence number for ordering
    pub sequence: u64,
    /// Monotonic capture timestamp
    pub captured_at: Instant,
    /// Duration of this frame
    pub duration: Duration,
    /// Did the VAD see speech in this frame?
    pub has_speech: bool,
    /// VAD speech probability (0.0 - 1.0)
    pub speech_confidence: f32,
    /// Energy level in dB
    pub energy_db: f32,
}

impl std::fmt::Debug for AudioFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioFrame")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("sequence", &self.sequence)
            .field("duration", &self.duration)
            .field("has_speech", &self.has_speech)
            .field("speech_confidence", &self.speech_confidence)
            .field("energy_db", &self.energy_db)
            .finish()
    }
}

impl AudioFrame {
    /// Create a new audio frame from f32 samples
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate, sequence: u64) -> Self {
        let duration = Duration::from_secs_f64(samples.len() as f64 / sample_rate.as_u32() as f64);
        let energy_db = calculate_energy_db(&samples);

        Self {
            samples: samples.into(),
            sample_rate,
            sequence,
            captured_at: Instant::now(),
            duration,
            has_speech: false,
            speech_confidence: 0.0,
            energy_db,
        }
    }

    /// Create audio frame with an explicit capture timestamp
    pub fn with_capture_time(
        samples: Vec<f32>,
        sample_rate: SampleRate,
        sequence: u64,
        captured_at: Instant,
    ) -> Self {
        let mut frame = Self::new(samples, sample_rate, sequence);
        frame.captured_at = captured_at;
        frame
    }

    /// Convert from PCM16 bytes (little-endian)
    pub fn from_pcm16(bytes: &[u8], sample_rate: SampleRate, sequence: u64) -> Self {
        let samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|chunk| {
                let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
                sample as f32 / PCM16_NORMALIZE
            })
            .collect();

        Self::new(samples, sample_rate, sequence)
    }

    /// Convert to PCM16 bytes (little-endian)
    pub fn to_pcm16(&self) -> Vec<u8> {
        pcm16_bytes(&self.samples)
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        self.duration.as_millis() as u64
    }

    /// Check if frame is likely silence based on energy
    pub fn is_likely_silence(&self, threshold_db: f32) -> bool {
        self.energy_db < threshold_db
    }

    /// High-quality resampling using Rubato (FFT-based).
    ///
    /// Falls back to linear interpolation for very short frames where the
    /// FFT resampler cannot be constructed.
    pub fn resample(&self, target_rate: SampleRate) -> Self {
        if self.sample_rate == target_rate {
            return self.clone();
        }
        let resampled = resample(&self.samples, self.sample_rate, target_rate);
        let mut frame = Self::new(resampled, target_rate, self.sequence);
        frame.captured_at = self.captured_at;
        frame.has_speech = self.has_speech;
        frame.speech_confidence = self.speech_confidence;
        frame
    }
}

/// Convert f32 samples to PCM16 bytes (little-endian)
pub fn pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let clamped = sample.clamp(-1.0, 1.0);
            let pcm16 = (clamped * PCM16_SCALE) as i16;
            pcm16.to_le_bytes()
        })
        .collect()
}

/// Calculate RMS energy in decibels
pub fn calculate_energy_db(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return SILENCE_DB;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_squares / samples.len() as f32).sqrt();

    if rms > 0.0 {
        20.0 * rms.log10()
    } else {
        SILENCE_DB
    }
}

/// Normalize samples in place to the given RMS level, clipping to [-1, 1].
///
/// Silence (zero RMS) is left untouched.
pub fn rms_normalize(samples: &mut [f32], target_dbfs: f32) {
    if samples.is_empty() {
        return;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    let rms = (sum_squares / samples.len() as f32).sqrt();
    if rms <= 0.0 {
        return;
    }

    let target_rms = 10.0_f32.powf(target_dbfs / 20.0);
    let gain = target_rms / rms;
    for sample in samples.iter_mut() {
        *sample = (*sample * gain).clamp(-1.0, 1.0);
    }
}

/// Resample a sample buffer between rates.
///
/// Uses Rubato's FFT resampler for buffers long enough to carry it, linear
/// interpolation otherwise (or when Rubato fails on an odd chunk size).
pub fn resample(samples: &[f32], from: SampleRate, to: SampleRate) -> Vec<f32> {
    use rubato::{FftFixedIn, Resampler};

    if from == to {
        return samples.to_vec();
    }

    if samples.len() < 64 {
        return resample_linear(samples, from, to);
    }

    let chunk_size = samples.len().min(1024);
    match FftFixedIn::<f64>::new(from.as_u32() as usize, to.as_u32() as usize, chunk_size, 2, 1) {
        Ok(mut resampler) => {
            let input = vec![samples.iter().map(|&s| s as f64).collect::<Vec<f64>>()];
            match resampler.process(&input, None) {
                Ok(output) => output[0].iter().map(|&s| s as f32).collect(),
                Err(e) => {
                    tracing::warn!("Rubato processing failed, using linear fallback: {}", e);
                    resample_linear(samples, from, to)
                },
            }
        },
        Err(e) => {
            tracing::warn!("Rubato init failed, using linear fallback: {}", e);
            resample_linear(samples, from, to)
        },
    }
}

fn resample_linear(samples: &[f32], from: SampleRate, to: SampleRate) -> Vec<f32> {
    let ratio = to.as_u32() as f64 / from.as_u32() as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;

    let mut resampled = Vec::with_capacity(new_len);
    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx_floor = src_idx.floor() as usize;
        let idx_ceil = (idx_floor + 1).min(samples.len().saturating_sub(1));
        let frac = (src_idx - idx_floor as f64) as f32;

        let sample = samples[idx_floor] * (1.0 - frac) + samples[idx_ceil] * frac;
        resampled.push(sample);
    }

    resampled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_conversions() {
        assert_eq!(SampleRate::Hz16000.as_u32(), 16000);
        assert_eq!(SampleRate::Hz16000.samples_per_ms(), 16);
        assert_eq!(SampleRate::Hz16000.samples_for_ms(250), 4000);
    }

    #[test]
    fn test_audio_frame_from_pcm16() {
        let pcm16: Vec<u8> = vec![0x00, 0x40, 0x00, 0xC0]; // Two samples
        let frame = AudioFrame::from_pcm16(&pcm16, SampleRate::Hz16000, 0);

        assert_eq!(frame.samples.len(), 2);
        assert!(frame.samples[0] > 0.0);
        assert!(frame.samples[1] < 0.0);
    }

    #[test]
    fn test_audio_frame_resample() {
        let samples = vec![0.0f32; 160]; // 10ms at 16kHz
        let frame = AudioFrame::new(samples, SampleRate::Hz16000, 0);

        let resampled = frame.resample(SampleRate::Hz8000);
        assert_eq!(resampled.samples.len(), 80); // 10ms at 8kHz
    }

    #[test]
    fn test_energy_calculation() {
        let silent = AudioFrame::new(vec![0.0; 160], SampleRate::Hz16000, 0);
        assert!(silent.energy_db < -90.0);

        let loud = AudioFrame::new(vec![0.5; 160], SampleRate::Hz16000, 0);
        assert!(loud.energy_db > -10.0);
    }

    #[test]
    fn test_rms_normalize_reaches_target() {
        let mut samples = vec![0.01f32; 1600];
        rms_normalize(&mut samples, -20.0);
        let energy = calculate_energy_db(&samples);
        assert!((energy - -20.0).abs() < 0.5, "got {energy}");
    }

    #[test]
    fn test_rms_normalize_clips() {
        let mut samples = vec![0.9f32, -0.9, 0.0001];
        rms_normalize(&mut samples, 0.0);
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }

    #[test]
    fn test_rms_normalize_leaves_silence() {
        let mut samples = vec![0.0f32; 16];
        rms_normalize(&mut samples, -20.0);
        assert!(samples.iter().all(|&s| s == 0.0));
    }
}
