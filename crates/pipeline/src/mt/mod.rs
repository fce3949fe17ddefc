//! Incremental machine translation stage
//!
//! One actor per (session, target language). Consumes caption updates,
//! decides per update whether a model call is warranted, assembles rolling
//! context, applies glossary terms, extracts the new part of
//! context-prefixed output, and attaches a composite confidence. Confirmed
//! sentences feed the context buffer; unchanged partials are served from
//! cache at effectively zero latency.

mod context;
mod glossary;
mod incremental;
mod quality;

pub use context::ContextBuffer;
pub use glossary::Glossary;
pub use incremental::{extract_new_translation, IncrementalController};
pub use quality::QualityFilter;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use lingo_config::MtConfig;
use lingo_core::{
    CaptionUpdate, Language, SemanticScorer, TranslationRequest, TranslationResult, Translator,
};

use crate::metrics::{
    MetricKey, MetricsSink, STAGE_DURATION_MS, STAGE_ERRORS, TRANSLATION_CONFIDENCE,
};
use crate::session::send_with_backpressure;

/// Sentences longer than this are force-completed to bound accumulation
const MAX_SENTENCE_WORDS: usize = 30;

/// Uncertain context extraction caps the result's confidence here
const EXTRACTION_UNCERTAIN_CEILING: f32 = 0.6;

/// Confidence reported for cache hits
const CACHED_CONFIDENCE: f32 = 0.95;

/// Incremental MT stage actor
pub struct MtStage {
    session_id: String,
    source_lang: Language,
    target_lang: Language,
    translator: Arc<dyn Translator>,
    glossary: Arc<Glossary>,
    context: ContextBuffer,
    controller: IncrementalController,
    quality: QualityFilter,

    request_timeout: Duration,
    partial_min_interval: Duration,
    sentence_break: Duration,
    error_window: usize,
    backpressure_deadline: Duration,
    drain_deadline: Duration,

    metrics: MetricsSink,
    degraded: Arc<AtomicBool>,

    /// Confirmed words of the sentence being assembled; survives utterance
    /// boundaries until terminal punctuation, a long pause, or the length cap
    sentence_words: Vec<String>,
    /// Capture time of the last sentence-boundary update, for pause gauging
    last_final_frame_at: Option<Instant>,
    consecutive_failures: usize,
}

impl MtStage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: impl Into<String>,
        source_lang: Language,
        target_lang: Language,
        translator: Arc<dyn Translator>,
        scorer: Option<Arc<dyn SemanticScorer>>,
        glossary: Arc<Glossary>,
        config: &MtConfig,
        backpressure_deadline: Duration,
        drain_deadline: Duration,
        degraded: Arc<AtomicBool>,
        metrics: MetricsSink,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            source_lang,
            target_lang,
            translator,
            glossary,
            context: ContextBuffer::new(config.context_max_sentences, config.context_max_tokens),
            controller: IncrementalController::new(),
            quality: QualityFilter::new(scorer),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            partial_min_interval: Duration::from_millis(config.partial_min_interval_ms),
            sentence_break: Duration::from_millis(config.sentence_break_ms),
            error_window: config.error_window,
            backpressure_deadline,
            drain_deadline,
            metrics,
            degraded,
            sentence_words: Vec::new(),
            last_final_frame_at: None,
            consecutive_failures: 0,
        }
    }

    fn metric_key(&self) -> MetricKey {
        MetricKey::new("mt", self.session_id.clone())
            .with_target(self.target_lang)
            .with_model(self.translator.model_id())
    }

    /// Run the stage until the input closes or cancellation is observed
    pub async fn run(
        mut self,
        mut caption_rx: mpsc::Receiver<CaptionUpdate>,
        result_tx: mpsc::Sender<TranslationResult>,
        mut cancel: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        self.drain(&mut caption_rx, &result_tx).await;
                        break;
                    }
                },
                maybe_update = caption_rx.recv() => match maybe_update {
                    Some(update) => {
                        if self
                            .handle_update(update, &mut caption_rx, &result_tx, &mut cancel)
                            .await
                            .is_err()
                        {
                            tracing::debug!(
                                session_id = %self.session_id,
                                target = %self.target_lang,
                                "Result channel closed, MT exiting"
                            );
                            return;
                        }
                    },
                    None => break,
                },
            }
        }
        tracing::debug!(session_id = %self.session_id, target = %self.target_lang, "MT stage exited");
    }

    /// Drain on cancellation: keep receiving until the upstream closes or
    /// the deadline passes. Final (sentence-boundary) updates are still
    /// translated; partials are discarded.
    async fn drain(
        &mut self,
        caption_rx: &mut mpsc::Receiver<CaptionUpdate>,
        result_tx: &mpsc::Sender<TranslationResult>,
    ) {
        let deadline = Instant::now() + self.drain_deadline;
        // Sender kept alive so the cancel branch never fires while draining
        let (_drain_cancel_tx, mut dead_cancel) = watch::channel(false);
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            match timeout(remaining, caption_rx.recv()).await {
                Ok(Some(update)) if update.is_final => {
                    if self
                        .handle_update(update, caption_rx, result_tx, &mut dead_cancel)
                        .await
                        .is_err()
                    {
                        return;
                    }
                },
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => break,
            }
        }
    }

    async fn handle_update(
        &mut self,
        update: CaptionUpdate,
        caption_rx: &mut mpsc::Receiver<CaptionUpdate>,
        result_tx: &mpsc::Sender<TranslationResult>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), ()> {
        // A long pause after an unpunctuated sentence boundary starts a new
        // sentence; a short one lets the sentence keep growing.
        if let Some(last_final) = self.last_final_frame_at.take() {
            let pause = update
                .utterance_started_at
                .checked_duration_since(last_final)
                .unwrap_or_default();
            if pause > self.sentence_break {
                self.sentence_words.clear();
            }
        }

        for word in &update.newly_confirmed {
            self.sentence_words.push(word.text.clone());
        }

        if update.is_final {
            self.handle_sentence_boundary(&update, caption_rx, result_tx, cancel)
                .await
        } else {
            self.handle_partial(&update, caption_rx, result_tx, cancel).await
        }
    }

    async fn handle_sentence_boundary(
        &mut self,
        update: &CaptionUpdate,
        caption_rx: &mut mpsc::Receiver<CaptionUpdate>,
        result_tx: &mpsc::Sender<TranslationResult>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), ()> {
        self.last_final_frame_at = Some(update.frame_captured_at);

        let sentence = self.sentence_words.join(" ");
        if sentence.is_empty() {
            return Ok(());
        }

        let Some(result) = self.translate(&sentence, false, update, cancel).await else {
            return Ok(());
        };

        if !result.is_failure() {
            self.context.push_or_extend(&sentence, &result.text);
            self.controller.finalize(&result.text);
        }

        if sentence_is_complete(&sentence) || self.sentence_words.len() >= MAX_SENTENCE_WORDS {
            self.sentence_words.clear();
        }

        self.emit(result, caption_rx, result_tx).await
    }

    async fn handle_partial(
        &mut self,
        update: &CaptionUpdate,
        caption_rx: &mut mpsc::Receiver<CaptionUpdate>,
        result_tx: &mpsc::Sender<TranslationResult>,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), ()> {
        let mut words = self.sentence_words.clone();
        words.extend(update.interim.iter().map(|c| c.text.clone()));
        let text_now = words.join(" ");
        if text_now.is_empty() {
            return Ok(());
        }

        if self.controller.should_translate(&text_now, self.partial_min_interval) {
            if let Some(result) = self.translate(&text_now, true, update, cancel).await {
                if !result.is_failure() {
                    self.controller.record_translation(&result.text);
                }
                return self.emit(result, caption_rx, result_tx).await;
            }
            return Ok(());
        }

        // Unchanged partial: serve the cached translation with ~zero latency
        if let Some(cached) = self.controller.cached() {
            let result = TranslationResult {
                text: cached.to_string(),
                confidence: CACHED_CONFIDENCE,
                source_lang: self.source_lang,
                target_lang: self.target_lang,
                latency_ms: 0.1,
                model_id: "cached".to_string(),
                used_context: false,
                applied_terms: Default::default(),
                is_partial: true,
                sequence_id: update.sequence,
                utterance_started_at: Some(update.utterance_started_at),
            };
            return self.emit(result, caption_rx, result_tx).await;
        }

        Ok(())
    }

    /// One translator pass with glossary, context assembly, extraction, and
    /// confidence scoring. Returns None when cancelled mid-call.
    async fn translate(
        &mut self,
        text: &str,
        is_partial: bool,
        update: &CaptionUpdate,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<TranslationResult> {
        let started = Instant::now();

        let (processed, applied_terms) =
            self.glossary.apply(text, self.source_lang, self.target_lang);

        let context = self.context.snapshot();
        let used_context = !context.is_empty();
        let input = if used_context {
            format!("{context} | {processed}")
        } else {
            processed.clone()
        };

        let request = TranslationRequest {
            text: text.to_string(),
            source_lang: self.source_lang,
            target_lang: self.target_lang,
            context: used_context.then(|| context.clone()),
            is_partial,
            sequence_id: update.sequence,
            session_id: self.session_id.clone(),
        };

        let outcome = tokio::select! {
            outcome = timeout(
                self.request_timeout,
                self.translator.translate(&input, self.source_lang, self.target_lang),
            ) => outcome,
            _ = cancel.changed() => {
                tracing::debug!(session_id = %self.session_id, "Translation cancelled mid-call");
                return None;
            },
        };

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics
            .record(STAGE_DURATION_MS, &self.metric_key(), latency_ms);

        let output = match outcome {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    target = %self.target_lang,
                    error = %e,
                    "Translator error"
                );
                return Some(self.failure(&request, latency_ms, update));
            },
            Err(_) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    target = %self.target_lang,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Translator timed out"
                );
                return Some(self.failure(&request, latency_ms, update));
            },
        };

        let (extracted, extraction_uncertain) = if used_context {
            extract_new_translation(&output, &context, &processed)
        } else {
            (output, false)
        };

        let mut confidence = self
            .quality
            .confidence(
                text,
                &extracted,
                self.source_lang,
                self.target_lang,
                used_context.then_some(context.as_str()),
            )
            .await;
        if extraction_uncertain {
            confidence = confidence.min(EXTRACTION_UNCERTAIN_CEILING);
        }

        self.consecutive_failures = 0;
        self.metrics
            .record(TRANSLATION_CONFIDENCE, &self.metric_key(), confidence as f64);

        Some(TranslationResult {
            text: extracted,
            confidence,
            source_lang: self.source_lang,
            target_lang: self.target_lang,
            latency_ms,
            model_id: self.translator.model_id().to_string(),
            used_context,
            applied_terms,
            is_partial,
            sequence_id: update.sequence,
            utterance_started_at: Some(update.utterance_started_at),
        })
    }

    fn failure(
        &mut self,
        request: &TranslationRequest,
        latency_ms: f64,
        update: &CaptionUpdate,
    ) -> TranslationResult {
        self.metrics.increment(STAGE_ERRORS, &self.metric_key(), 1);
        self.consecutive_failures += 1;
        if self.consecutive_failures >= self.error_window && !self.degraded.load(Ordering::Relaxed)
        {
            self.degraded.store(true, Ordering::Relaxed);
            tracing::warn!(
                session_id = %self.session_id,
                target = %self.target_lang,
                failures = self.consecutive_failures,
                "Translation degraded: consecutive failure window exceeded"
            );
        }

        let mut result = TranslationResult::failure(request, latency_ms);
        result.utterance_started_at = Some(update.utterance_started_at);
        result
    }

    async fn emit(
        &mut self,
        result: TranslationResult,
        caption_rx: &mut mpsc::Receiver<CaptionUpdate>,
        result_tx: &mpsc::Sender<TranslationResult>,
    ) -> Result<(), ()> {
        let key = self.metric_key();
        send_with_backpressure(
            result_tx,
            result,
            caption_rx,
            self.backpressure_deadline,
            &self.metrics,
            &key,
        )
        .await
        .map_err(|_| ())
    }
}

fn sentence_is_complete(sentence: &str) -> bool {
    sentence
        .trim_end()
        .ends_with(|c: char| matches!(c, '.' | '!' | '?'))
}
