//! Audio framing
//!
//! Turns an arbitrary-rate stream of raw samples into fixed-duration,
//! overlapping, VAD-tagged frames. Incoming audio is resampled to the
//! recognizer rate and RMS-normalized before framing. Completed frames wait
//! in a bounded pending queue; when the consumer falls more than
//! `max_pending` frames behind, the eldest undelivered frame is dropped.

use std::collections::VecDeque;
use std::time::Instant;

use lingo_config::SttConfig;
use lingo_core::{resample, rms_normalize, AudioFrame, SampleRate};

use crate::vad::{EnergyVad, VadEngine};

/// Streaming audio chunker with overlap and VAD tagging
pub struct AudioFramer {
    input_rate: SampleRate,
    output_rate: SampleRate,
    chunk_samples: usize,
    step_samples: usize,
    normalize_dbfs: f32,
    vad_threshold: f32,
    energy_floor_db: f32,
    max_pending: usize,

    vad: Box<dyn VadEngine>,
    /// Fallback scorer when the primary VAD errors
    energy_fallback: EnergyVad,
    vad_degraded: bool,

    buffer: Vec<f32>,
    pending: VecDeque<AudioFrame>,
    sequence: u64,
    frames_dropped: u64,
}

impl AudioFramer {
    /// Create a framer with the default energy VAD
    pub fn new(input_rate: SampleRate, config: &SttConfig) -> Self {
        Self::with_vad(input_rate, config, Box::new(EnergyVad::new(config.energy_floor_db)))
    }

    /// Create a framer with a specific VAD engine
    pub fn with_vad(input_rate: SampleRate, config: &SttConfig, vad: Box<dyn VadEngine>) -> Self {
        let output_rate = SampleRate::from_hz(config.sample_rate).unwrap_or_default();
        let chunk_samples = output_rate.samples_for_ms(config.chunk_ms);
        let overlap_samples = output_rate.samples_for_ms(config.overlap_ms);

        Self {
            input_rate,
            output_rate,
            chunk_samples,
            step_samples: chunk_samples - overlap_samples,
            normalize_dbfs: config.normalize_dbfs,
            vad_threshold: config.vad_threshold,
            energy_floor_db: config.energy_floor_db,
            max_pending: config.max_pending_frames,
            vad,
            energy_fallback: EnergyVad::new(config.energy_floor_db),
            vad_degraded: false,
            buffer: Vec::with_capacity(chunk_samples * 2),
            pending: VecDeque::new(),
            sequence: 0,
            frames_dropped: 0,
        }
    }

    /// Append raw samples, cutting any completed frames into the pending
    /// queue. Returns the number of eldest frames dropped on overflow.
    pub fn push(&mut self, samples: &[f32]) -> usize {
        if samples.is_empty() {
            return 0;
        }

        let mut normalized = resample(samples, self.input_rate, self.output_rate);
        rms_normalize(&mut normalized, self.normalize_dbfs);
        self.buffer.extend_from_slice(&normalized);

        let mut dropped = 0;
        while self.buffer.len() >= self.chunk_samples {
            let chunk: Vec<f32> = self.buffer[..self.chunk_samples].to_vec();
            self.buffer.drain(..self.step_samples);
            dropped += self.enqueue(chunk, Instant::now());
        }
        dropped
    }

    /// Flush any remaining buffered audio as a final, possibly short frame
    pub fn drain(&mut self) -> usize {
        if self.buffer.is_empty() {
            return 0;
        }
        let remainder: Vec<f32> = self.buffer.drain(..).collect();
        self.enqueue(remainder, Instant::now())
    }

    fn enqueue(&mut self, samples: Vec<f32>, captured_at: Instant) -> usize {
        let mut frame =
            AudioFrame::with_capture_time(samples, self.output_rate, self.sequence, captured_at);
        self.sequence += 1;

        let prob = self.score(&frame);
        frame.speech_confidence = prob;
        frame.has_speech = prob >= self.vad_threshold && frame.energy_db > self.energy_floor_db;

        let mut dropped = 0;
        while self.pending.len() >= self.max_pending {
            self.pending.pop_front();
            self.frames_dropped += 1;
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped, "Framer consumer behind, dropped eldest frames");
        }
        self.pending.push_back(frame);
        dropped
    }

    fn score(&mut self, frame: &AudioFrame) -> f32 {
        match self.vad.score(&frame.samples, self.output_rate) {
            Ok(prob) => prob,
            Err(e) => {
                if !self.vad_degraded {
                    self.vad_degraded = true;
                    tracing::warn!(
                        vad = self.vad.name(),
                        error = %e,
                        "VAD failed, degrading to energy scoring"
                    );
                }
                self.energy_fallback.score_energy(frame.energy_db)
            },
        }
    }

    /// Next undelivered frame, eldest first
    pub fn pop_frame(&mut self) -> Option<AudioFrame> {
        self.pending.pop_front()
    }

    /// Drop the eldest undelivered frame (backpressure catch-up)
    pub fn drop_oldest(&mut self) -> bool {
        if self.pending.pop_front().is_some() {
            self.frames_dropped += 1;
            true
        } else {
            false
        }
    }

    /// Undelivered frame count
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Total frames dropped since construction
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    /// Did the VAD degrade to the energy fallback?
    pub fn is_vad_degraded(&self) -> bool {
        self.vad_degraded
    }

    /// Recognizer-side sample count per full frame
    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    /// Reset framing state, keeping configuration
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending.clear();
        self.sequence = 0;
    }
}
