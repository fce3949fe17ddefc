//! Streaming speech-to-text stage
//!
//! One actor per session. Consumes VAD-tagged audio frames, re-decodes a
//! rolling window of recent speech on every speech frame, and stabilizes
//! the resulting hypothesis stream with LocalAgreement-2 so that confirmed
//! caption words are never rewritten. Utterance boundaries come from the
//! frame tags via the utterance tracker; end-of-speech triggers a relaxed
//! finalization pass.

mod stabilizer;

pub use stabilizer::{AgreementOutcome, LocalAgreement};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use lingo_config::{AgreementConfig, SttConfig};
use lingo_core::{AudioFrame, Caption, CaptionUpdate, Language, SampleRate, SpeechRecognizer};

use crate::metrics::{
    MetricKey, MetricsSink, CAPTION_LATENCY_MS, FRAMES_EXPIRED, STAGE_DURATION_MS, STAGE_ERRORS,
    WORDS_CONFIRMED, WORDS_RETRACTED,
};
use crate::session::send_with_backpressure;
use crate::vad::{UtteranceEvent, UtteranceTracker};

/// Streaming STT stage actor
pub struct SttStage {
    session_id: String,
    recognizer: Arc<dyn SpeechRecognizer>,
    stabilizer: LocalAgreement,
    tracker: UtteranceTracker,
    caption: Caption,
    metrics: MetricsSink,

    sample_rate: SampleRate,
    decode_window_samples: usize,
    max_frame_age: Duration,
    backpressure_deadline: Duration,
    drain_deadline: Duration,

    /// Rolling window of recent speech samples handed to the recognizer
    window: VecDeque<f32>,
    sequence: u64,
    utterance_started_at: Option<Instant>,
    detected_language: Option<Language>,
    finalized: bool,
}

impl SttStage {
    pub fn new(
        session_id: impl Into<String>,
        recognizer: Arc<dyn SpeechRecognizer>,
        stt: &SttConfig,
        agreement: &AgreementConfig,
        backpressure_deadline: Duration,
        drain_deadline: Duration,
        metrics: MetricsSink,
    ) -> Self {
        let sample_rate = SampleRate::from_hz(stt.sample_rate).unwrap_or_default();
        Self {
            session_id: session_id.into(),
            recognizer,
            stabilizer: LocalAgreement::new(agreement),
            tracker: UtteranceTracker::new(stt.min_speech_frames, stt.min_silence_frames),
            caption: Caption::new(),
            metrics,
            sample_rate,
            decode_window_samples: sample_rate.samples_for_ms(stt.decode_window_ms),
            max_frame_age: Duration::from_millis(stt.max_frame_age_ms),
            backpressure_deadline,
            drain_deadline,
            window: VecDeque::new(),
            sequence: 0,
            utterance_started_at: None,
            detected_language: None,
            finalized: false,
        }
    }

    fn metric_key(&self) -> MetricKey {
        MetricKey::new("stt", self.session_id.clone()).with_model(self.recognizer.model_name())
    }

    /// Run the stage until the input closes or cancellation is observed
    pub async fn run(
        mut self,
        mut frame_rx: mpsc::Receiver<AudioFrame>,
        caption_tx: mpsc::Sender<CaptionUpdate>,
        mut cancel: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        self.drain(&mut frame_rx, &caption_tx).await;
                        break;
                    }
                },
                maybe_frame = frame_rx.recv() => match maybe_frame {
                    Some(frame) => {
                        if self
                            .handle_frame(frame, &mut frame_rx, &caption_tx)
                            .await
                            .is_err()
                        {
                            tracing::debug!(session_id = %self.session_id, "Caption channel closed, STT exiting");
                            return;
                        }
                    },
                    None => {
                        let _ = self.finalize_utterance(&caption_tx).await;
                        break;
                    },
                },
            }
        }
        tracing::debug!(session_id = %self.session_id, "STT stage exited");
    }

    /// Consume whatever is already queued (bounded by the drain deadline),
    /// then emit the relaxed finalization.
    async fn drain(
        &mut self,
        frame_rx: &mut mpsc::Receiver<AudioFrame>,
        caption_tx: &mpsc::Sender<CaptionUpdate>,
    ) {
        let deadline = Instant::now() + self.drain_deadline;
        while Instant::now() < deadline {
            match frame_rx.try_recv() {
                Ok(frame) => {
                    if self.handle_frame(frame, frame_rx, caption_tx).await.is_err() {
                        return;
                    }
                },
                Err(_) => break,
            }
        }
        let _ = self.finalize_utterance(caption_tx).await;
    }

    async fn handle_frame(
        &mut self,
        frame: AudioFrame,
        frame_rx: &mut mpsc::Receiver<AudioFrame>,
        caption_tx: &mpsc::Sender<CaptionUpdate>,
    ) -> Result<(), ()> {
        if frame.captured_at.elapsed() > self.max_frame_age {
            self.metrics.increment(FRAMES_EXPIRED, &self.metric_key(), 1);
            return Ok(());
        }

        match self.tracker.update(frame.has_speech) {
            UtteranceEvent::Started => {
                self.utterance_started_at = Some(frame.captured_at);
                self.finalized = false;
            },
            UtteranceEvent::Ended => {
                self.finalize_utterance(caption_tx).await?;
            },
            UtteranceEvent::None => {},
        }

        if !frame.has_speech {
            return Ok(());
        }

        self.window.extend(frame.samples.iter().copied());
        while self.window.len() > self.decode_window_samples {
            self.window.pop_front();
        }

        let decode_budget = frame.duration.checked_mul(2).unwrap_or(frame.duration);
        let samples: Vec<f32> = self.window.iter().copied().collect();

        let started = Instant::now();
        let decoded = timeout(
            decode_budget,
            self.recognizer.transcribe(&samples, self.sample_rate),
        )
        .await;
        self.metrics.record(
            STAGE_DURATION_MS,
            &self.metric_key(),
            started.elapsed().as_secs_f64() * 1000.0,
        );

        let transcription = match decoded {
            Ok(Ok(transcription)) => transcription,
            Ok(Err(e)) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Recognizer error, frame skipped");
                self.metrics.increment(STAGE_ERRORS, &self.metric_key(), 1);
                return Ok(());
            },
            Err(_) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    budget_ms = decode_budget.as_millis() as u64,
                    "Recognizer decode timed out, frame skipped"
                );
                self.metrics.increment(STAGE_ERRORS, &self.metric_key(), 1);
                return Ok(());
            },
        };

        if let Some(lang) = transcription.language {
            self.detected_language = Some(lang);
        }
        if transcription.is_empty() {
            return Ok(());
        }

        let outcome = self.stabilizer.process_hypothesis(&transcription.words);
        let update = self.build_update(outcome, frame.captured_at, false);
        self.emit(update, frame_rx, caption_tx).await
    }

    /// End-of-speech: re-run the stabilizer with the relaxed threshold and
    /// emit trailing words as a final update. Idempotent.
    async fn finalize_utterance(
        &mut self,
        caption_tx: &mpsc::Sender<CaptionUpdate>,
    ) -> Result<(), ()> {
        if self.finalized || self.utterance_started_at.is_none() {
            return Ok(());
        }
        self.finalized = true;

        let trailing = self.stabilizer.finalize();
        let outcome = AgreementOutcome {
            interim: Vec::new(),
            newly_confirmed: trailing,
        };
        let update = self.build_update(outcome, Instant::now(), true);

        // A final update goes out even with nothing newly confirmed so
        // downstream sees the utterance boundary.
        let result = match caption_tx
            .send_timeout(update.clone(), self.drain_deadline)
            .await
        {
            Ok(()) => {
                self.record_confirmations(&update);
                Ok(())
            },
            Err(_) => Err(()),
        };

        self.stabilizer.reset();
        self.window.clear();
        self.utterance_started_at = None;
        result
    }

    fn build_update(
        &mut self,
        outcome: AgreementOutcome,
        frame_captured_at: Instant,
        is_final: bool,
    ) -> CaptionUpdate {
        self.sequence += 1;
        CaptionUpdate {
            session_id: self.session_id.clone(),
            sequence: self.sequence,
            has_new_confirmations: !outcome.newly_confirmed.is_empty(),
            interim: outcome.interim,
            newly_confirmed: outcome.newly_confirmed,
            detected_language: self.detected_language,
            frame_captured_at,
            utterance_started_at: self.utterance_started_at.unwrap_or(frame_captured_at),
            is_final,
        }
    }

    async fn emit(
        &mut self,
        update: CaptionUpdate,
        frame_rx: &mut mpsc::Receiver<AudioFrame>,
        caption_tx: &mpsc::Sender<CaptionUpdate>,
    ) -> Result<(), ()> {
        self.record_confirmations(&update);

        let key = self.metric_key();
        send_with_backpressure(
            caption_tx,
            update,
            frame_rx,
            self.backpressure_deadline,
            &self.metrics,
            &key,
        )
        .await
        .map_err(|_| ())
    }

    fn record_confirmations(&mut self, update: &CaptionUpdate) {
        let key = self.metric_key();

        if update.has_new_confirmations {
            self.metrics
                .increment(WORDS_CONFIRMED, &key, update.newly_confirmed.len() as u64);
            let latency_ms = update.frame_captured_at.elapsed().as_secs_f64() * 1000.0;
            self.metrics.record(CAPTION_LATENCY_MS, &key, latency_ms);
        }

        let retracted = self.caption.apply(update);
        if retracted > 0 {
            self.metrics.increment(WORDS_RETRACTED, &key, retracted);
        }
    }
}
