//! End-to-end pipeline tests: audio in, captions/translations/audio out
//!
//! These drive a full session pipeline (framer -> STT -> MT -> TTS) with
//! scripted backends and assert the externally observable contract.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::timeout;

use lingo_config::Settings;
use lingo_core::{
    Language, RecognizedWord, Result as CoreResult, SampleRate, SpeechRecognizer, Transcription,
    Translator,
};
use lingo_pipeline::{
    EngineRegistry, Glossary, MetricsSink, PipelineBackends, SessionEvent, SessionPipeline,
    SessionState, SilenceSynthesizer,
};

/// Recognizer keyed on signal frequency: low-pitched test tones decode to
/// one phrase, high-pitched tones to another. Hypotheses therefore depend
/// on the audio itself, like a real decoder, and repeat across overlapping
/// windows so the agreement filter can confirm them.
struct ToneRecognizer {
    low: Vec<&'static str>,
    high: Vec<&'static str>,
    calls: Mutex<usize>,
}

impl ToneRecognizer {
    fn new(low: Vec<&'static str>, high: Vec<&'static str>) -> Self {
        Self {
            low,
            high,
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl SpeechRecognizer for ToneRecognizer {
    async fn transcribe(&self, samples: &[f32], _rate: SampleRate) -> CoreResult<Transcription> {
        *self.calls.lock() += 1;

        // Zero-crossing rate over non-silent samples picks the phrase
        let crossings = samples
            .windows(2)
            .filter(|w| w[0] * w[1] < 0.0)
            .count();
        let voiced = samples.iter().filter(|s| s.abs() > 1e-6).count().max(1);
        let words = if crossings as f64 / voiced as f64 > 0.05 {
            &self.high
        } else {
            &self.low
        };

        Ok(Transcription {
            words: words
                .iter()
                .enumerate()
                .map(|(i, text)| RecognizedWord {
                    text: text.to_string(),
                    confidence: 0.9,
                    start_time: i as f64 * 0.3,
                    end_time: i as f64 * 0.3 + 0.25,
                })
                .collect(),
            language: Some(Language::English),
        })
    }

    fn supported_languages(&self) -> &[Language] {
        &[Language::English]
    }

    fn model_name(&self) -> &str {
        "tone"
    }
}

/// Dictionary translator with a call counter
struct DictTranslator {
    entries: HashMap<&'static str, &'static str>,
    calls: Mutex<u64>,
}

impl DictTranslator {
    fn new(entries: &[(&'static str, &'static str)]) -> Self {
        Self {
            entries: entries.iter().copied().collect(),
            calls: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Translator for DictTranslator {
    async fn translate(&self, text: &str, _s: Language, _t: Language) -> CoreResult<String> {
        *self.calls.lock() += 1;
        Ok(self
            .entries
            .get(text)
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("<{text}>")))
    }

    fn supports(&self, _s: Language, _t: Language) -> bool {
        true
    }

    fn model_id(&self) -> &str {
        "dict"
    }
}

fn backends(
    recognizer: Arc<dyn SpeechRecognizer>,
    translator: Arc<dyn Translator>,
) -> PipelineBackends {
    let mut engines = EngineRegistry::new();
    engines.register(Arc::new(SilenceSynthesizer::with_profile(
        "fast",
        50,
        SampleRate::Hz22050,
        Language::all().to_vec(),
    )));
    PipelineBackends {
        recognizer,
        translator,
        scorer: None,
        engines: Arc::new(engines),
        glossary: Arc::new(Glossary::new()),
    }
}

fn speech_samples(ms: u32) -> Vec<f32> {
    let n = SampleRate::Hz16000.samples_for_ms(ms);
    (0..n).map(|i| (i as f32 * 0.07).sin() * 0.4).collect()
}

fn high_speech_samples(ms: u32) -> Vec<f32> {
    let n = SampleRate::Hz16000.samples_for_ms(ms);
    (0..n).map(|i| (i as f32 * 0.5).sin() * 0.4).collect()
}

fn silence_samples(ms: u32) -> Vec<f32> {
    vec![0.0; SampleRate::Hz16000.samples_for_ms(ms)]
}

async fn collect_until_closed(
    mut events: tokio::sync::mpsc::Receiver<SessionEvent>,
) -> Vec<SessionEvent> {
    let mut collected = Vec::new();
    while let Ok(Some(event)) = timeout(Duration::from_secs(5), events.recv()).await {
        let closed = matches!(event, SessionEvent::Closed);
        collected.push(event);
        if closed {
            break;
        }
    }
    collected
}

#[tokio::test]
async fn test_hello_world_end_to_end() {
    let recognizer = Arc::new(ToneRecognizer::new(vec!["hello", "world"], vec![]));
    let translator = Arc::new(DictTranslator::new(&[("hello world", "Hola mundo")]));
    let backends = backends(recognizer, translator);

    let session = SessionPipeline::spawn(
        "e2e-hello",
        Language::English,
        &[Language::Spanish],
        SampleRate::Hz16000,
        &Settings::default(),
        &backends,
        MetricsSink::default(),
    )
    .unwrap();

    let collector = tokio::spawn(collect_until_closed(session.take_events().unwrap()));
    let utterance_start = Instant::now();

    // Three speech frames, then enough silence to close the utterance
    for _ in 0..3 {
        session.push_audio(&speech_samples(250)).await.unwrap();
    }
    for _ in 0..3 {
        session.push_audio(&silence_samples(250)).await.unwrap();
    }

    // Give the pipeline a moment, then shut down and collect everything
    tokio::time::sleep(Duration::from_millis(200)).await;
    session.close();
    let events = collector.await.unwrap();
    session.closed().await;

    // Confirmed caption words arrived, in order, exactly once
    let mut confirmed = Vec::new();
    for event in &events {
        if let SessionEvent::Caption { update } = event {
            confirmed.extend(update.newly_confirmed.iter().map(|w| w.text.clone()));
        }
    }
    assert_eq!(confirmed, vec!["hello", "world"]);

    // The translation came through for the target language
    let translations: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Translation { target, result }
                if *target == Language::Spanish && !result.is_partial =>
            {
                Some(result.text.as_str())
            },
            _ => None,
        })
        .collect();
    assert!(translations.contains(&"Hola mundo"), "got {translations:?}");

    // First audio chunk is marked and arrived within the TTFT budget
    let first_audio = events
        .iter()
        .find_map(|e| match e {
            SessionEvent::Audio { chunk, .. } if chunk.is_first_audio => Some(chunk),
            _ => None,
        })
        .expect("a first-audio chunk must be emitted");
    assert!(!first_audio.is_final);
    assert!(
        utterance_start.elapsed() < Duration::from_millis(3000),
        "first audio must not stall"
    );

    // The utterance's audio stream terminated
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Audio { chunk, .. } if chunk.is_final
    )));
}

#[tokio::test]
async fn test_pause_grows_sentence_without_retraction() {
    // "The quick brown" <pause ~800ms> "fox"
    let recognizer = Arc::new(ToneRecognizer::new(
        vec!["the", "quick", "brown"],
        vec!["fox"],
    ));
    let translator = Arc::new(DictTranslator::new(&[]));
    let backends = backends(recognizer, translator.clone());

    let session = SessionPipeline::spawn(
        "e2e-pause",
        Language::English,
        &[Language::Spanish],
        SampleRate::Hz16000,
        &Settings::default(),
        &backends,
        MetricsSink::default(),
    )
    .unwrap();
    let collector = tokio::spawn(collect_until_closed(session.take_events().unwrap()));

    for _ in 0..3 {
        session.push_audio(&speech_samples(250)).await.unwrap();
    }
    // ~800ms pause: utterance closes (>= 2 silence frames), sentence stays open
    for _ in 0..3 {
        session.push_audio(&silence_samples(250)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    for _ in 0..3 {
        session.push_audio(&high_speech_samples(250)).await.unwrap();
    }
    for _ in 0..3 {
        session.push_audio(&silence_samples(250)).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    session.close();
    let events = collector.await.unwrap();
    session.closed().await;

    // Sentence-boundary translations: the second carries the grown sentence
    let finals: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Translation { result, .. } if !result.is_partial => {
                Some(result.text.as_str())
            },
            _ => None,
        })
        .collect();
    assert!(
        finals.iter().any(|t| t.contains("the quick brown fox")),
        "grown sentence must be translated, got {finals:?}"
    );

    // No confirmed word was ever retracted: every caption update's confirmed
    // words extend the previous ones
    let mut all_confirmed: Vec<String> = Vec::new();
    for event in &events {
        if let SessionEvent::Caption { update } = event {
            for word in &update.newly_confirmed {
                all_confirmed.push(word.text.clone());
            }
        }
    }
    assert_eq!(all_confirmed, vec!["the", "quick", "brown", "fox"]);
}

#[tokio::test]
async fn test_session_cancel_mid_utterance() {
    let recognizer = Arc::new(ToneRecognizer::new(vec!["unfinished"], vec![]));
    let translator = Arc::new(DictTranslator::new(&[]));
    let backends = backends(recognizer, translator);

    let session = SessionPipeline::spawn(
        "e2e-cancel",
        Language::English,
        &[Language::Spanish],
        SampleRate::Hz16000,
        &Settings::default(),
        &backends,
        MetricsSink::default(),
    )
    .unwrap();
    let collector = tokio::spawn(collect_until_closed(session.take_events().unwrap()));

    // Speech only, no closing silence: the utterance is open when we cancel
    session.push_audio(&speech_samples(250)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let cancel_at = Instant::now();
    session.close();
    let events = collector.await.unwrap();
    session.closed().await;
    let shutdown = cancel_at.elapsed();

    // Relaxed finalization emitted the trailing word
    let finals: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Caption { update } if update.is_final => Some(
                update
                    .newly_confirmed
                    .iter()
                    .map(|w| w.text.clone())
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        })
        .flatten()
        .collect();
    assert!(finals.contains(&"unfinished".to_string()));

    // TTS terminated its stream
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Audio { chunk, .. } if chunk.is_final
    )));

    // All stages exited promptly (drain deadlines are 500ms per stage)
    assert!(shutdown < Duration::from_secs(3), "shutdown took {shutdown:?}");
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_finalizing_closed_session_is_noop() {
    let backends = PipelineBackends::noop();
    let session = SessionPipeline::spawn(
        "e2e-idempotent",
        Language::English,
        &[Language::Spanish],
        SampleRate::Hz16000,
        &Settings::default(),
        &backends,
        MetricsSink::default(),
    )
    .unwrap();

    session.close();
    session.closed().await;
    assert_eq!(session.state(), SessionState::Closed);

    // Closing again changes nothing and does not panic
    session.close();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_ordering_translations_follow_caption_order() {
    // Two utterances, well separated: translations must arrive in caption
    // order for the target
    let recognizer = Arc::new(ToneRecognizer::new(vec!["first"], vec!["second"]));
    let translator = Arc::new(DictTranslator::new(&[]));
    let backends = backends(recognizer.clone(), translator);

    let mut settings = Settings::default();
    settings.mt.sentence_break_ms = 1; // every pause starts a new sentence

    let session = SessionPipeline::spawn(
        "e2e-order",
        Language::English,
        &[Language::Spanish],
        SampleRate::Hz16000,
        &settings,
        &backends,
        MetricsSink::default(),
    )
    .unwrap();
    let collector = tokio::spawn(collect_until_closed(session.take_events().unwrap()));

    for _ in 0..3 {
        session.push_audio(&speech_samples(250)).await.unwrap();
    }
    for _ in 0..3 {
        session.push_audio(&silence_samples(250)).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;
    for _ in 0..3 {
        session.push_audio(&high_speech_samples(250)).await.unwrap();
    }
    for _ in 0..3 {
        session.push_audio(&silence_samples(250)).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    session.close();
    let events = collector.await.unwrap();
    session.closed().await;

    assert!(recognizer.calls() >= 2, "decoder must have run");

    let finals: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Translation { result, .. } if !result.is_partial => {
                Some(result.text.clone())
            },
            _ => None,
        })
        .collect();

    let first_pos = finals.iter().position(|t| t.contains("first"));
    let second_pos = finals.iter().position(|t| t.contains("second") && !t.contains("first"));
    if let (Some(first), Some(second)) = (first_pos, second_pos) {
        assert!(first < second, "results out of order: {finals:?}");
    }

    // Sequence ids on results are monotonically non-decreasing
    let seqs: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Translation { result, .. } => Some(result.sequence_id),
            _ => None,
        })
        .collect();
    assert!(seqs.windows(2).all(|w| w[0] <= w[1]), "sequence ids regressed: {seqs:?}");
}
