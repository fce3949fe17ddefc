//! Session lifecycle and stage wiring
//!
//! A session owns one framer + STT pipeline and one MT + TTS pipeline per
//! target language, joined by bounded channels. Caption updates fan out to
//! every target. Close is cooperative and idempotent: the cancel signal
//! flips once, every stage drains briefly and emits its final outputs, and
//! the supervisor marks the session closed when all tasks have exited.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, watch};

use lingo_config::Settings;
use lingo_core::{
    AudioChunk, AudioFrame, CaptionUpdate, Language, SampleRate, SemanticScorer,
    SpeechRecognizer, TranslationResult, Translator,
};

use crate::framer::AudioFramer;
use crate::metrics::{MetricKey, MetricsSink, BACKPRESSURE_DROPS};
use crate::mt::{Glossary, MtStage};
use crate::noop::{NoopRecognizer, NoopTranslator, SilenceSynthesizer};
use crate::stt::SttStage;
use crate::tts::{EngineRegistry, TtsStage, VoicePreset};
use crate::PipelineError;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Active,
    Draining,
    Closed,
}

/// Egress events for one session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Source-language caption update
    Caption { update: CaptionUpdate },
    /// Translated caption for one target
    Translation {
        target: Language,
        result: TranslationResult,
    },
    /// Synthesized audio chunk for one target
    Audio { target: Language, chunk: AudioChunk },
    /// All stage tasks have exited
    Closed,
}

/// Model backends shared across sessions (weights are read-only; per-session
/// state lives in the stages, never here)
#[derive(Clone)]
pub struct PipelineBackends {
    pub recognizer: Arc<dyn SpeechRecognizer>,
    pub translator: Arc<dyn Translator>,
    pub scorer: Option<Arc<dyn SemanticScorer>>,
    pub engines: Arc<EngineRegistry>,
    pub glossary: Arc<Glossary>,
}

impl PipelineBackends {
    /// Backends for environments without loaded models
    pub fn noop() -> Self {
        let mut engines = EngineRegistry::new();
        engines.register(Arc::new(SilenceSynthesizer::new()));
        Self {
            recognizer: Arc::new(NoopRecognizer::new()),
            translator: Arc::new(NoopTranslator::new()),
            scorer: None,
            engines: Arc::new(engines),
            glossary: Arc::new(Glossary::with_defaults()),
        }
    }
}

/// Send with bounded-blocking backpressure.
///
/// A send blocked past the deadline drops the oldest item from the caller's
/// own input queue to catch up, counts it, and retries.
pub(crate) async fn send_with_backpressure<T: Send, U: Send>(
    tx: &mpsc::Sender<T>,
    item: T,
    input_rx: &mut mpsc::Receiver<U>,
    deadline: Duration,
    metrics: &MetricsSink,
    key: &MetricKey,
) -> Result<(), PipelineError> {
    let mut pending = item;
    loop {
        match tx.send_timeout(pending, deadline).await {
            Ok(()) => return Ok(()),
            Err(SendTimeoutError::Timeout(returned)) => {
                if input_rx.try_recv().is_ok() {
                    metrics.increment(BACKPRESSURE_DROPS, key, 1);
                }
                pending = returned;
            },
            Err(SendTimeoutError::Closed(_)) => {
                return Err(PipelineError::ChannelClosed(key.stage));
            },
        }
    }
}

/// Builder/spawner for session pipelines
pub struct SessionPipeline;

impl SessionPipeline {
    /// Wire and spawn all stage tasks for one session.
    ///
    /// Refuses to create the session when any requested language pair has
    /// no translator or no synthesis engine; existing sessions are never
    /// affected by such refusals.
    pub fn spawn(
        id: impl Into<String>,
        source_lang: Language,
        target_langs: &[Language],
        ingress_rate: SampleRate,
        settings: &Settings,
        backends: &PipelineBackends,
        metrics: MetricsSink,
    ) -> Result<SessionHandle, PipelineError> {
        let id = id.into();
        if target_langs.is_empty() {
            return Err(PipelineError::Session("no target languages".to_string()));
        }

        for &target in target_langs {
            if !backends.translator.supports(source_lang, target) {
                return Err(PipelineError::Core(lingo_core::Error::UnsupportedPair {
                    src_lang: source_lang,
                    target,
                }));
            }
            if !backends.engines.supports(target) {
                return Err(PipelineError::Session(format!(
                    "no synthesis engine for {target}"
                )));
            }
        }

        let backpressure_deadline =
            Duration::from_millis(settings.channels.backpressure_deadline_ms);
        let drain_deadline = Duration::from_millis(settings.session.drain_deadline_ms);

        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(settings.channels.frames);
        let (caption_tx, caption_rx) = mpsc::channel::<CaptionUpdate>(settings.channels.captions);
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(settings.channels.captions);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SessionState::Active);
        let state_tx = Arc::new(state_tx);
        let degraded = Arc::new(AtomicBool::new(false));

        let mut tasks = Vec::new();

        // STT stage
        let stt = SttStage::new(
            id.clone(),
            backends.recognizer.clone(),
            &settings.stt,
            &settings.agreement,
            backpressure_deadline,
            drain_deadline,
            metrics.clone(),
        );
        tasks.push(tokio::spawn(stt.run(
            frame_rx,
            caption_tx,
            cancel_rx.clone(),
        )));

        // Per-target MT + TTS pipelines
        let mut target_caption_txs = Vec::with_capacity(target_langs.len());
        for &target in target_langs {
            let (target_caption_tx, target_caption_rx) =
                mpsc::channel::<CaptionUpdate>(settings.channels.captions);
            let (result_tx, result_rx) =
                mpsc::channel::<TranslationResult>(settings.channels.translations);
            let (tts_tx, tts_rx) =
                mpsc::channel::<TranslationResult>(settings.channels.translations);
            target_caption_txs.push((target, target_caption_tx));

            let mt = MtStage::new(
                id.clone(),
                source_lang,
                target,
                backends.translator.clone(),
                backends.scorer.clone(),
                backends.glossary.clone(),
                &settings.mt,
                backpressure_deadline,
                drain_deadline,
                degraded.clone(),
                metrics.clone(),
            );
            tasks.push(tokio::spawn(mt.run(
                target_caption_rx,
                result_tx,
                cancel_rx.clone(),
            )));

            // Relay: translated captions to egress, results onward to TTS
            tasks.push(tokio::spawn(relay_results(
                id.clone(),
                target,
                result_rx,
                tts_tx,
                event_tx.clone(),
                backpressure_deadline,
                metrics.clone(),
            )));

            let preset = settings
                .tts
                .voice_presets
                .get(target.code())
                .map(|cfg| VoicePreset::from_config(target, cfg))
                .unwrap_or_else(|| VoicePreset::default_for(target));

            let tts = TtsStage::new(
                id.clone(),
                target,
                backends.engines.clone(),
                preset,
                &settings.tts,
                backpressure_deadline,
                drain_deadline,
                metrics.clone(),
            );
            tasks.push(tokio::spawn(tts.run(
                tts_rx,
                event_tx.clone(),
                cancel_rx.clone(),
            )));
        }

        // Caption router: egress + fan-out to every target
        tasks.push(tokio::spawn(route_captions(
            id.clone(),
            caption_rx,
            target_caption_txs,
            event_tx.clone(),
            backpressure_deadline,
            metrics.clone(),
        )));

        // Supervisor: waits for every stage task, then marks the session
        // closed and notifies egress
        {
            let state_tx = state_tx.clone();
            let id = id.clone();
            tokio::spawn(async move {
                for task in tasks {
                    let _ = task.await;
                }
                let _ = state_tx.send(SessionState::Closed);
                let _ = event_tx
                    .send_timeout(SessionEvent::Closed, Duration::from_millis(100))
                    .await;
                tracing::info!(session_id = %id, "Session closed");
            });
        }

        let framer = AudioFramer::new(ingress_rate, &settings.stt);

        tracing::info!(
            session_id = %id,
            source = %source_lang,
            targets = ?target_langs.iter().map(|l| l.code()).collect::<Vec<_>>(),
            "Session pipeline spawned"
        );

        Ok(SessionHandle {
            id,
            source_lang,
            target_langs: target_langs.to_vec(),
            framer: Mutex::new(framer),
            frame_tx,
            cancel_tx,
            state_tx,
            state_rx,
            events: Mutex::new(Some(event_rx)),
            degraded,
            created_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
            backpressure_deadline,
            metrics,
        })
    }
}

/// Handle to a running session pipeline
pub struct SessionHandle {
    id: String,
    source_lang: Language,
    target_langs: Vec<Language>,
    framer: Mutex<AudioFramer>,
    frame_tx: mpsc::Sender<AudioFrame>,
    cancel_tx: watch::Sender<bool>,
    state_tx: Arc<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
    events: Mutex<Option<mpsc::Receiver<SessionEvent>>>,
    degraded: Arc<AtomicBool>,
    created_at: Instant,
    last_activity: Mutex<Instant>,
    backpressure_deadline: Duration,
    metrics: MetricsSink,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_lang(&self) -> Language {
        self.source_lang
    }

    pub fn target_langs(&self) -> &[Language] {
        &self.target_langs
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Has the MT error window tripped the degraded-service flag?
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Take the egress event receiver; yields None once taken before
    pub fn take_events(&self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events.lock().take()
    }

    /// Feed raw mono samples into the session.
    ///
    /// Frames the audio, then forwards completed frames to the STT stage.
    /// A forward blocked past the backpressure deadline drops that eldest
    /// frame and keeps going.
    pub async fn push_audio(&self, samples: &[f32]) -> Result<(), PipelineError> {
        if self.state() != SessionState::Active {
            return Err(PipelineError::Session(format!(
                "session {} is not active",
                self.id
            )));
        }
        *self.last_activity.lock() = Instant::now();

        let (frames, dropped) = {
            let mut framer = self.framer.lock();
            let dropped = framer.push(samples);
            let mut frames = Vec::with_capacity(framer.pending());
            while let Some(frame) = framer.pop_frame() {
                frames.push(frame);
            }
            (frames, dropped)
        };
        if dropped > 0 {
            let key = MetricKey::new("framer", self.id.clone());
            self.metrics
                .increment(crate::metrics::FRAMES_DROPPED, &key, dropped as u64);
        }

        self.forward_frames(frames).await
    }

    /// Flush the framer's remainder as a final short frame
    pub async fn finish_input(&self) -> Result<(), PipelineError> {
        let frames = {
            let mut framer = self.framer.lock();
            framer.drain();
            let mut frames = Vec::new();
            while let Some(frame) = framer.pop_frame() {
                frames.push(frame);
            }
            frames
        };
        self.forward_frames(frames).await
    }

    async fn forward_frames(&self, frames: Vec<AudioFrame>) -> Result<(), PipelineError> {
        let key = MetricKey::new("framer", self.id.clone());
        for frame in frames {
            match self
                .frame_tx
                .send_timeout(frame, self.backpressure_deadline)
                .await
            {
                Ok(()) => {},
                Err(SendTimeoutError::Timeout(_)) => {
                    // This frame is the eldest undelivered; it is the drop
                    self.metrics.increment(BACKPRESSURE_DROPS, &key, 1);
                },
                Err(SendTimeoutError::Closed(_)) => {
                    return Err(PipelineError::ChannelClosed("framer"));
                },
            }
        }
        Ok(())
    }

    /// Request cooperative shutdown. Idempotent: repeat calls are no-ops.
    pub fn close(&self) {
        if *self.cancel_tx.borrow() {
            return;
        }
        tracing::info!(session_id = %self.id, "Session close requested");
        if self.state() == SessionState::Active {
            let _ = self.state_tx.send(SessionState::Draining);
        }
        let _ = self.cancel_tx.send(true);
    }

    /// Wait until every stage task has exited
    pub async fn closed(&self) {
        let mut state_rx = self.state_rx.clone();
        let _ = state_rx
            .wait_for(|state| *state == SessionState::Closed)
            .await;
    }

    /// VAD running on the energy fallback?
    pub fn is_vad_degraded(&self) -> bool {
        self.framer.lock().is_vad_degraded()
    }
}

/// Forward caption updates to the egress channel and every target pipeline
async fn route_captions(
    session_id: String,
    mut caption_rx: mpsc::Receiver<CaptionUpdate>,
    targets: Vec<(Language, mpsc::Sender<CaptionUpdate>)>,
    event_tx: mpsc::Sender<SessionEvent>,
    deadline: Duration,
    metrics: MetricsSink,
) {
    let key = MetricKey::new("router", session_id.clone());
    while let Some(update) = caption_rx.recv().await {
        // Display egress may be dropped under pressure; fan-out to MT may not
        let _ = event_tx
            .send_timeout(
                SessionEvent::Caption {
                    update: update.clone(),
                },
                deadline,
            )
            .await;

        for (_, tx) in &targets {
            let item = update.clone();
            if send_with_backpressure(tx, item, &mut caption_rx, deadline, &metrics, &key)
                .await
                .is_err()
            {
                // That target is gone; the others continue
                continue;
            }
        }
    }
    tracing::debug!(session_id = %session_id, "Caption router exited");
}

/// Copy translated captions to egress and forward results to TTS
async fn relay_results(
    session_id: String,
    target: Language,
    mut result_rx: mpsc::Receiver<TranslationResult>,
    tts_tx: mpsc::Sender<TranslationResult>,
    event_tx: mpsc::Sender<SessionEvent>,
    deadline: Duration,
    metrics: MetricsSink,
) {
    let key = MetricKey::new("router", session_id.clone()).with_target(target);
    while let Some(result) = result_rx.recv().await {
        let _ = event_tx
            .send_timeout(
                SessionEvent::Translation {
                    target,
                    result: result.clone(),
                },
                deadline,
            )
            .await;

        if send_with_backpressure(&tts_tx, result, &mut result_rx, deadline, &metrics, &key)
            .await
            .is_err()
        {
            break;
        }
    }
    tracing::debug!(session_id = %session_id, target = %target, "Result relay exited");
}
