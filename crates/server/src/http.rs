//! HTTP surface
//!
//! Health, SLO stats, Prometheus exposition, language/voice discovery, and
//! session administration.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use lingo_core::Language;
use lingo_pipeline::metrics::{
    BACKPRESSURE_DROPS, CAPTION_LATENCY_MS, FRAMES_DROPPED, FRAMES_EXPIRED, STAGE_DURATION_MS,
    STAGE_ERRORS, TRANSLATION_CONFIDENCE, TTFT_MS, WORDS_CONFIRMED, WORDS_RETRACTED,
};
use lingo_pipeline::Rollup;

use crate::state::AppState;
use crate::websocket::WebSocketHandler;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .route("/stats", get(stats))
        .route("/languages", get(languages))
        .route("/voices", get(voices))
        .route("/sessions", get(list_sessions))
        .route("/sessions/:id", delete(close_session))
        .route("/ws/stream", get(WebSocketHandler::handle))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "uptime_s": state.started_at.elapsed().as_secs(),
        "active_sessions": state.sessions.count(),
        "recognizer": state.backends.recognizer.model_name(),
        "translator": state.backends.translator.model_id(),
        "engines": state.backends.engines.engine_names(),
    }))
}

async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::NOT_FOUND,
            "prometheus exporter disabled".to_string(),
        ),
    }
}

#[derive(Serialize)]
struct StatsResponse {
    ttft_ms: Rollup,
    caption_latency_ms: Rollup,
    stage_duration_ms: Rollup,
    translation_confidence: Rollup,
    words_confirmed: u64,
    words_retracted: u64,
    retraction_rate: f64,
    frames_dropped: u64,
    frames_expired: u64,
    backpressure_drops: u64,
    stage_errors: u64,
    metrics_dropped: u64,
}

/// SLO rollups from the in-process sink
async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = &state.metrics;
    let confirmed = metrics.counter_total(WORDS_CONFIRMED);
    let retracted = metrics.counter_total(WORDS_RETRACTED);
    let emitted = confirmed + retracted;

    Json(StatsResponse {
        ttft_ms: metrics.rollup(TTFT_MS),
        caption_latency_ms: metrics.rollup(CAPTION_LATENCY_MS),
        stage_duration_ms: metrics.rollup(STAGE_DURATION_MS),
        translation_confidence: metrics.rollup(TRANSLATION_CONFIDENCE),
        words_confirmed: confirmed,
        words_retracted: retracted,
        retraction_rate: if emitted > 0 {
            retracted as f64 / emitted as f64
        } else {
            0.0
        },
        frames_dropped: metrics.counter_total(FRAMES_DROPPED),
        frames_expired: metrics.counter_total(FRAMES_EXPIRED),
        backpressure_drops: metrics.counter_total(BACKPRESSURE_DROPS),
        stage_errors: metrics.counter_total(STAGE_ERRORS),
        metrics_dropped: metrics.samples_dropped(),
    })
}

/// Language pairs the loaded translator supports
async fn languages(State(state): State<AppState>) -> impl IntoResponse {
    let translator = &state.backends.translator;
    let pairs: Vec<serde_json::Value> = Language::all()
        .iter()
        .flat_map(|&source| {
            Language::all().iter().filter_map(move |&target| {
                (source != target && translator.supports(source, target)).then(|| {
                    json!({ "source": source, "target": target })
                })
            })
        })
        .collect();

    Json(json!({ "pairs": pairs }))
}

/// Configured voice presets and available engines per language
async fn voices(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config.read();
    let voices: Vec<serde_json::Value> = Language::all()
        .iter()
        .filter(|&&lang| state.backends.engines.supports(lang))
        .map(|&lang| {
            let preset = config.tts.voice_presets.get(lang.code());
            json!({
                "language": lang,
                "voice_id": preset.map(|p| p.voice_id.clone()),
                "pinned_engine": preset.and_then(|p| p.engine.clone()),
                "engines": state
                    .backends
                    .engines
                    .for_language(lang)
                    .iter()
                    .map(|e| e.name().to_string())
                    .collect::<Vec<_>>(),
            })
        })
        .collect();

    Json(json!({ "voices": voices }))
}

async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.list())
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.sessions.close(&id) {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lingo_config::Settings;
    use lingo_pipeline::PipelineBackends;

    #[tokio::test]
    async fn test_router_builds() {
        let state = AppState::new(Settings::default(), PipelineBackends::noop());
        let _router = create_router(state);
    }

    #[tokio::test]
    async fn test_stats_retraction_rate() {
        let state = AppState::new(Settings::default(), PipelineBackends::noop());
        let key = lingo_pipeline::MetricKey::new("stt", "s1");
        state.metrics.increment(WORDS_CONFIRMED, &key, 95);
        state.metrics.increment(WORDS_RETRACTED, &key, 5);

        let response = stats(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
