//! Streaming speech synthesis stage
//!
//! One actor per (session, target language). Consumes translation results
//! and streams synthesized audio chunks as they are generated; the first
//! chunk of each result is tagged `is_first_audio` and stamps TTFT. Engine
//! failures produce one silent chunk followed by the final marker and never
//! stop the session. Failure-marker translations are not synthesized.

mod engines;

pub use engines::{load_reference_audio, EngineRegistry, VoicePreset};

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use lingo_config::TtsConfig;
use lingo_core::{rms_normalize, AudioChunk, Language, SpeechSynthesizer, TranslationResult};

use crate::metrics::{MetricKey, MetricsSink, STAGE_DURATION_MS, STAGE_ERRORS, TTFT_MS};
use crate::session::{send_with_backpressure, SessionEvent};

/// Post-processing RMS target
const POST_NORMALIZE_DBFS: f32 = -20.0;

/// Streaming TTS stage actor
pub struct TtsStage {
    session_id: String,
    target_lang: Language,
    engines: Arc<EngineRegistry>,
    preset: VoicePreset,

    chunk_ms: u32,
    first_chunk_timeout: Duration,
    ttft_budget_ms: u32,
    post_processing: bool,
    noise_gate_db: f32,
    backpressure_deadline: Duration,
    drain_deadline: Duration,

    metrics: MetricsSink,

    /// Text already spoken for the sentence in progress. Retranslations of
    /// a growing partial synthesize only the new suffix; identical text is
    /// not spoken twice.
    spoken: Option<String>,
}

impl TtsStage {
    pub fn new(
        session_id: impl Into<String>,
        target_lang: Language,
        engines: Arc<EngineRegistry>,
        preset: VoicePreset,
        config: &TtsConfig,
        backpressure_deadline: Duration,
        drain_deadline: Duration,
        metrics: MetricsSink,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            target_lang,
            engines,
            preset,
            chunk_ms: config.chunk_ms,
            first_chunk_timeout: Duration::from_millis(config.first_chunk_timeout_ms),
            ttft_budget_ms: config.ttft_budget_ms,
            post_processing: config.post_processing,
            noise_gate_db: config.noise_gate_db,
            backpressure_deadline,
            drain_deadline,
            metrics,
            spoken: None,
        }
    }

    fn metric_key(&self, engine: &str) -> MetricKey {
        MetricKey::new("tts", self.session_id.clone())
            .with_target(self.target_lang)
            .with_model(engine)
    }

    /// Run the stage until the input closes or cancellation is observed
    pub async fn run(
        mut self,
        mut result_rx: mpsc::Receiver<TranslationResult>,
        event_tx: mpsc::Sender<SessionEvent>,
        mut cancel: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        self.drain(&mut result_rx, &event_tx).await;
                        // The stream ends with an explicit final marker
                        let _ = event_tx
                            .send_timeout(
                                self.audio_event(AudioChunk::final_marker(
                                    lingo_core::SampleRate::default(),
                                    0,
                                    "cancelled",
                                )),
                                self.backpressure_deadline,
                            )
                            .await;
                        break;
                    }
                },
                maybe_result = result_rx.recv() => match maybe_result {
                    Some(result) => {
                        if self
                            .handle_result(result, &mut result_rx, &event_tx, &mut cancel)
                            .await
                            .is_err()
                        {
                            tracing::debug!(
                                session_id = %self.session_id,
                                target = %self.target_lang,
                                "Event channel closed, TTS exiting"
                            );
                            return;
                        }
                    },
                    None => break,
                },
            }
        }
        tracing::debug!(session_id = %self.session_id, target = %self.target_lang, "TTS stage exited");
    }

    /// Drain on cancellation: keep receiving until the upstream closes or
    /// the deadline passes, so in-flight translations still get spoken.
    async fn drain(
        &mut self,
        result_rx: &mut mpsc::Receiver<TranslationResult>,
        event_tx: &mpsc::Sender<SessionEvent>,
    ) {
        let deadline = Instant::now() + self.drain_deadline;
        // Sender kept alive so synthesis is not re-cancelled mid-drain
        let (_drain_cancel_tx, mut dead_cancel) = watch::channel(false);
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            match timeout(remaining, result_rx.recv()).await {
                Ok(Some(result)) => {
                    if self
                        .handle_result(result, result_rx, event_tx, &mut dead_cancel)
                        .await
                        .is_err()
                    {
                        return;
                    }
                },
                Ok(None) => break,
                Err(_) => break,
            }
        }
    }

    async fn handle_result(
        &mut self,
        result: TranslationResult,
        result_rx: &mut mpsc::Receiver<TranslationResult>,
        event_tx: &mpsc::Sender<SessionEvent>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), ()> {
        // Failure markers must never be spoken
        if result.is_failure() || result.text.trim().is_empty() {
            return Ok(());
        }

        // Incremental emission: speak only what has not been spoken yet
        let to_speak = match &self.spoken {
            Some(prev) if result.text == *prev => None,
            Some(prev) if result.text.starts_with(prev.as_str()) => {
                let suffix = result.text[prev.len()..].trim().to_string();
                (!suffix.is_empty()).then_some(suffix)
            },
            // Diverged or fresh sentence: speak the whole text
            _ => Some(result.text.clone()),
        };
        if result.is_partial {
            self.spoken = Some(result.text.clone());
        } else {
            self.spoken = None;
        }
        let Some(text) = to_speak else {
            return Ok(());
        };
        let result = TranslationResult {
            text,
            ..result
        };

        let elapsed_ms = result
            .utterance_started_at
            .map(|at| at.elapsed().as_millis() as u32)
            .unwrap_or(0);
        let remaining_budget = self.ttft_budget_ms.saturating_sub(elapsed_ms);

        let Some(engine) = self.engines.select(&self.preset, remaining_budget) else {
            tracing::error!(
                session_id = %self.session_id,
                target = %self.target_lang,
                "No synthesis engine for language"
            );
            return self.fail(&result, "none", result_rx, event_tx).await;
        };

        self.synthesize(&result, engine, result_rx, event_tx, cancel).await
    }

    async fn synthesize(
        &mut self,
        result: &TranslationResult,
        engine: Arc<dyn SpeechSynthesizer>,
        result_rx: &mut mpsc::Receiver<TranslationResult>,
        event_tx: &mpsc::Sender<SessionEvent>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), ()> {
        let started = Instant::now();
        let sample_rate = engine.sample_rate();
        let chunk_samples = sample_rate.samples_for_ms(self.chunk_ms);
        let engine_name = engine.name().to_string();

        let mut stream = engine.synthesize_stream(&result.text, &self.preset.voice);
        let mut acc: Vec<f32> = Vec::with_capacity(chunk_samples * 2);
        let mut sequence: u32 = 0;
        let mut first_emitted = false;

        loop {
            let item = if first_emitted {
                tokio::select! {
                    item = stream.next() => item,
                    changed = cancel.changed() => {
                        if changed.is_err() || *cancel.borrow() {
                            drop(stream);
                            return self
                                .emit(
                                    AudioChunk::final_marker(sample_rate, sequence, &engine_name),
                                    result_rx,
                                    event_tx,
                                )
                                .await;
                        }
                        continue;
                    },
                }
            } else {
                // The first buffer is held to the first-chunk deadline
                match timeout(self.first_chunk_timeout, stream.next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        tracing::warn!(
                            session_id = %self.session_id,
                            engine = %engine_name,
                            timeout_ms = self.first_chunk_timeout.as_millis() as u64,
                            "First synthesis chunk timed out"
                        );
                        drop(stream);
                        return self.fail(result, &engine_name, result_rx, event_tx).await;
                    },
                }
            };

            match item {
                Some(Ok(buffer)) => {
                    acc.extend_from_slice(&buffer);

                    // First audio goes out as soon as anything is available
                    if !first_emitted && !acc.is_empty() {
                        let take = acc.len().min(chunk_samples);
                        let samples: Vec<f32> = acc.drain(..take).collect();
                        let chunk =
                            self.make_chunk(samples, sample_rate, sequence, true, &engine_name);
                        sequence += 1;
                        first_emitted = true;
                        self.record_ttft(result, &engine_name);
                        self.emit(chunk, result_rx, event_tx).await?;
                    }

                    while acc.len() >= chunk_samples {
                        let samples: Vec<f32> = acc.drain(..chunk_samples).collect();
                        let chunk =
                            self.make_chunk(samples, sample_rate, sequence, false, &engine_name);
                        sequence += 1;
                        self.emit(chunk, result_rx, event_tx).await?;
                    }
                },
                Some(Err(e)) => {
                    tracing::warn!(
                        session_id = %self.session_id,
                        engine = %engine_name,
                        error = %e,
                        "Synthesis failed mid-stream"
                    );
                    drop(stream);
                    return self.fail(result, &engine_name, result_rx, event_tx).await;
                },
                None => break,
            }
        }
        drop(stream);

        if !acc.is_empty() {
            let samples = std::mem::take(&mut acc);
            let is_first = !first_emitted;
            let chunk = self.make_chunk(samples, sample_rate, sequence, is_first, &engine_name);
            sequence += 1;
            if is_first {
                self.record_ttft(result, &engine_name);
            }
            self.emit(chunk, result_rx, event_tx).await?;
        }

        self.metrics.record(
            STAGE_DURATION_MS,
            &self.metric_key(&engine_name),
            started.elapsed().as_secs_f64() * 1000.0,
        );

        self.emit(
            AudioChunk::final_marker(sample_rate, sequence, &engine_name),
            result_rx,
            event_tx,
        )
        .await
    }

    /// Engine failure path: one silent chunk, then the final marker
    async fn fail(
        &mut self,
        result: &TranslationResult,
        engine_name: &str,
        result_rx: &mut mpsc::Receiver<TranslationResult>,
        event_tx: &mpsc::Sender<SessionEvent>,
    ) -> Result<(), ()> {
        self.metrics
            .increment(STAGE_ERRORS, &self.metric_key(engine_name), 1);
        tracing::debug!(
            session_id = %self.session_id,
            sequence_id = result.sequence_id,
            "Emitting silence for failed synthesis"
        );

        let sample_rate = lingo_core::SampleRate::default();
        let silence = AudioChunk::silence(sample_rate, self.chunk_ms, engine_name);
        self.emit(silence, result_rx, event_tx).await?;
        self.emit(
            AudioChunk::final_marker(sample_rate, 1, engine_name),
            result_rx,
            event_tx,
        )
        .await
    }

    fn make_chunk(
        &self,
        mut samples: Vec<f32>,
        sample_rate: lingo_core::SampleRate,
        sequence: u32,
        is_first_audio: bool,
        engine: &str,
    ) -> AudioChunk {
        if self.post_processing {
            self.post_process(&mut samples);
        }
        AudioChunk {
            samples: samples.into(),
            sample_rate,
            sequence,
            is_first_audio,
            is_final: false,
            engine: engine.to_string(),
        }
    }

    /// Per-chunk noise gate + RMS normalization. Pure sample math on one
    /// chunk; adds no buffering latency.
    fn post_process(&self, samples: &mut [f32]) {
        let gate = 10.0f32.powf(self.noise_gate_db / 20.0);
        for sample in samples.iter_mut() {
            if sample.abs() < gate {
                *sample = 0.0;
            }
        }
        rms_normalize(samples, POST_NORMALIZE_DBFS);
    }

    fn record_ttft(&self, result: &TranslationResult, engine: &str) {
        if let Some(started_at) = result.utterance_started_at {
            let ttft_ms = started_at.elapsed().as_secs_f64() * 1000.0;
            self.metrics.record(TTFT_MS, &self.metric_key(engine), ttft_ms);
        }
    }

    fn audio_event(&self, chunk: AudioChunk) -> SessionEvent {
        SessionEvent::Audio {
            target: self.target_lang,
            chunk,
        }
    }

    async fn emit(
        &self,
        chunk: AudioChunk,
        result_rx: &mut mpsc::Receiver<TranslationResult>,
        event_tx: &mpsc::Sender<SessionEvent>,
    ) -> Result<(), ()> {
        let key = self.metric_key(&chunk.engine);
        send_with_backpressure(
            event_tx,
            self.audio_event(chunk),
            result_rx,
            self.backpressure_deadline,
            &self.metrics,
            &key,
        )
        .await
        .map_err(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noop::SilenceSynthesizer;
    use futures::Stream;
    use lingo_core::{Result as CoreResult, SampleRate, VoiceConfig};
    use std::collections::HashMap;
    use std::pin::Pin;

    fn translation(text: &str) -> TranslationResult {
        TranslationResult {
            text: text.to_string(),
            confidence: 0.9,
            source_lang: Language::English,
            target_lang: Language::Spanish,
            latency_ms: 20.0,
            model_id: "dict".to_string(),
            used_context: false,
            applied_terms: HashMap::new(),
            is_partial: false,
            sequence_id: 1,
            utterance_started_at: Some(Instant::now()),
        }
    }

    fn registry() -> Arc<EngineRegistry> {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(SilenceSynthesizer::with_profile(
            "silence",
            50,
            SampleRate::Hz22050,
            vec![Language::Spanish],
        )));
        Arc::new(registry)
    }

    fn stage(engines: Arc<EngineRegistry>, metrics: MetricsSink) -> TtsStage {
        TtsStage::new(
            "s1",
            Language::Spanish,
            engines,
            VoicePreset::default_for(Language::Spanish),
            &TtsConfig::default(),
            Duration::from_millis(250),
            Duration::from_millis(500),
            metrics,
        )
    }

    async fn collect_chunks(
        stage: TtsStage,
        results: Vec<TranslationResult>,
    ) -> Vec<AudioChunk> {
        let (result_tx, result_rx) = mpsc::channel(16);
        let (event_tx, mut event_rx) = mpsc::channel(64);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(stage.run(result_rx, event_tx, cancel_rx));

        for result in results {
            result_tx.send(result).await.unwrap();
        }
        drop(result_tx);

        let mut chunks = Vec::new();
        while let Some(event) = event_rx.recv().await {
            if let SessionEvent::Audio { chunk, .. } = event {
                chunks.push(chunk);
            }
        }
        handle.await.unwrap();
        chunks
    }

    #[tokio::test]
    async fn test_first_chunk_marked_and_final_marker_emitted() {
        let metrics = MetricsSink::default();
        let chunks = collect_chunks(
            stage(registry(), metrics.clone()),
            vec![translation("hola mundo")],
        )
        .await;

        assert!(chunks.len() >= 2);
        assert!(chunks[0].is_first_audio);
        assert!(!chunks[0].is_final);
        assert!(chunks.last().unwrap().is_final);
        assert!(chunks.last().unwrap().samples.is_empty());

        // Exactly one first-audio chunk, exactly one final marker
        assert_eq!(chunks.iter().filter(|c| c.is_first_audio).count(), 1);
        assert_eq!(chunks.iter().filter(|c| c.is_final).count(), 1);

        // TTFT was stamped
        assert_eq!(metrics.rollup(TTFT_MS).count, 1);
    }

    #[tokio::test]
    async fn test_chunks_bounded_by_chunk_ms() {
        let chunks = collect_chunks(
            stage(registry(), MetricsSink::default()),
            vec![translation("una frase bastante larga para varios trozos")],
        )
        .await;

        let max_samples = SampleRate::Hz22050.samples_for_ms(100);
        for chunk in &chunks {
            assert!(chunk.samples.len() <= max_samples);
        }
    }

    #[tokio::test]
    async fn test_failure_marker_not_synthesized() {
        let mut result = translation("anything");
        result.text = lingo_core::TRANSLATION_ERROR_TEXT.to_string();
        result.confidence = 0.0;

        let chunks = collect_chunks(stage(registry(), MetricsSink::default()), vec![result]).await;
        assert!(chunks.is_empty(), "confidence=0 results must not be played");
    }

    /// Engine whose stream always errors
    struct BrokenEngine;

    impl SpeechSynthesizer for BrokenEngine {
        fn synthesize_stream(
            &self,
            _text: &str,
            _voice: &VoiceConfig,
        ) -> Pin<Box<dyn Stream<Item = CoreResult<Vec<f32>>> + Send + '_>> {
            Box::pin(futures::stream::once(async {
                Err(lingo_core::Error::Synthesizer("vocoder exploded".to_string()))
            }))
        }
        fn sample_rate(&self) -> SampleRate {
            SampleRate::Hz22050
        }
        fn name(&self) -> &str {
            "broken"
        }
        fn estimated_ttft_ms(&self) -> u32 {
            10
        }
        fn supported_languages(&self) -> &[Language] {
            &[Language::Spanish]
        }
    }

    #[tokio::test]
    async fn test_engine_failure_emits_silence_then_final() {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(BrokenEngine));
        let metrics = MetricsSink::default();

        let chunks = collect_chunks(
            stage(Arc::new(registry), metrics.clone()),
            vec![translation("error-text")],
        )
        .await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].samples.iter().all(|&s| s == 0.0), "failure chunk is silence");
        assert!(chunks[1].is_final);
        assert_eq!(metrics.counter_total(STAGE_ERRORS), 1);
    }

    #[tokio::test]
    async fn test_no_engine_for_language_fails_gracefully() {
        let empty = Arc::new(EngineRegistry::new());
        let metrics = MetricsSink::default();
        let chunks =
            collect_chunks(stage(empty, metrics.clone()), vec![translation("hola")]).await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks[1].is_final);
        assert_eq!(metrics.counter_total(STAGE_ERRORS), 1);
    }
}
