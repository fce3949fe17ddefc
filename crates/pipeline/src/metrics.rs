//! Metrics sink
//!
//! Non-blocking, bounded recording of per-event timings and counters, with
//! p50/p95/p99 rollups for the SLO endpoints. Every sample is also mirrored
//! to the `metrics` facade so the Prometheus exporter sees it. A full sample
//! buffer silently drops the oldest entries and counts `metrics_dropped`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lingo_core::Language;

/// Histogram metric names
pub const TTFT_MS: &str = "ttft_ms";
pub const CAPTION_LATENCY_MS: &str = "caption_latency_ms";
pub const STAGE_DURATION_MS: &str = "stage_duration_ms";
pub const TRANSLATION_CONFIDENCE: &str = "translation_confidence";

/// Counter metric names
pub const WORDS_CONFIRMED: &str = "words_confirmed";
pub const WORDS_RETRACTED: &str = "words_retracted";
pub const FRAMES_DROPPED: &str = "frames_dropped";
pub const FRAMES_EXPIRED: &str = "frames_expired";
pub const BACKPRESSURE_DROPS: &str = "backpressure_drops";
pub const STAGE_ERRORS: &str = "stage_errors";

/// Attribution key for a sample
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    pub stage: &'static str,
    pub session: String,
    pub target: Option<Language>,
    pub model: String,
}

impl MetricKey {
    pub fn new(stage: &'static str, session: impl Into<String>) -> Self {
        Self {
            stage,
            session: session.into(),
            target: None,
            model: String::new(),
        }
    }

    pub fn with_target(mut self, target: Language) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn target_label(&self) -> String {
        self.target.map(|l| l.code().to_string()).unwrap_or_default()
    }
}

/// Percentile rollup over a bounded sample window
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Rollup {
    pub count: usize,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Default)]
struct Inner {
    histograms: Mutex<HashMap<(&'static str, MetricKey), Vec<f64>>>,
    counters: Mutex<HashMap<(&'static str, MetricKey), u64>>,
}

/// Cheap-to-clone handle to the shared sink
#[derive(Clone)]
pub struct MetricsSink {
    inner: Arc<Inner>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl MetricsSink {
    pub fn new(sample_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            capacity: sample_capacity.max(1),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record one histogram sample. Never blocks; a full buffer drops the
    /// oldest sample.
    pub fn record(&self, metric: &'static str, key: &MetricKey, value: f64) {
        {
            let mut histograms = self.inner.histograms.lock();
            let buffer = histograms.entry((metric, key.clone())).or_default();
            if buffer.len() >= self.capacity {
                buffer.remove(0);
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            buffer.push(value);
        }

        metrics::histogram!(
            metric,
            "stage" => key.stage,
            "session" => key.session.clone(),
            "target_lang" => key.target_label(),
            "model_id" => key.model.clone(),
        )
        .record(value);
    }

    /// Increment a counter
    pub fn increment(&self, metric: &'static str, key: &MetricKey, n: u64) {
        {
            let mut counters = self.inner.counters.lock();
            *counters.entry((metric, key.clone())).or_default() += n;
        }

        metrics::counter!(
            metric,
            "stage" => key.stage,
            "session" => key.session.clone(),
            "target_lang" => key.target_label(),
            "model_id" => key.model.clone(),
        )
        .increment(n);
    }

    /// Rollup of one metric across all keys
    pub fn rollup(&self, metric: &str) -> Rollup {
        let histograms = self.inner.histograms.lock();
        let mut samples: Vec<f64> = histograms
            .iter()
            .filter(|((name, _), _)| *name == metric)
            .flat_map(|(_, buffer)| buffer.iter().copied())
            .collect();
        rollup_of(&mut samples)
    }

    /// Rollup of one metric for one session
    pub fn rollup_for_session(&self, metric: &str, session: &str) -> Rollup {
        let histograms = self.inner.histograms.lock();
        let mut samples: Vec<f64> = histograms
            .iter()
            .filter(|((name, key), _)| *name == metric && key.session == session)
            .flat_map(|(_, buffer)| buffer.iter().copied())
            .collect();
        rollup_of(&mut samples)
    }

    /// Total of one counter across all keys
    pub fn counter_total(&self, metric: &str) -> u64 {
        let counters = self.inner.counters.lock();
        counters
            .iter()
            .filter(|((name, _), _)| *name == metric)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Total of one counter for one session
    pub fn counter_for_session(&self, metric: &str, session: &str) -> u64 {
        let counters = self.inner.counters.lock();
        counters
            .iter()
            .filter(|((name, key), _)| *name == metric && key.session == session)
            .map(|(_, v)| *v)
            .sum()
    }

    /// Samples silently discarded because a buffer was full
    pub fn samples_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Forget all samples and counters attributed to a session
    pub fn forget_session(&self, session: &str) {
        self.inner
            .histograms
            .lock()
            .retain(|(_, key), _| key.session != session);
        self.inner
            .counters
            .lock()
            .retain(|(_, key), _| key.session != session);
    }
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

fn rollup_of(samples: &mut [f64]) -> Rollup {
    if samples.is_empty() {
        return Rollup::default();
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Rollup {
        count: samples.len(),
        p50: percentile(samples, 0.50),
        p95: percentile(samples, 0.95),
        p99: percentile(samples, 0.99),
    }
}

/// Nearest-rank percentile over sorted samples
fn percentile(sorted: &[f64], q: f64) -> f64 {
    let rank = ((sorted.len() as f64 * q).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}
