//! Application state
//!
//! Shared state across all handlers.

use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

use lingo_config::Settings;
use lingo_pipeline::{MetricsSink, PipelineBackends};

use crate::session::SessionManager;

/// Application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration; RwLock leaves room for hot-reload
    pub config: Arc<RwLock<Settings>>,
    /// Session registry
    pub sessions: Arc<SessionManager>,
    /// Shared model backends (read-only across sessions)
    pub backends: PipelineBackends,
    /// In-process metrics sink for the SLO endpoints
    pub metrics: MetricsSink,
    /// Prometheus exposition handle, when the exporter is enabled
    pub prometheus: Option<PrometheusHandle>,
    /// Process start, for uptime reporting
    pub started_at: Instant,
}

impl AppState {
    /// Create application state with the given backends
    pub fn new(config: Settings, backends: PipelineBackends) -> Self {
        let metrics = MetricsSink::new(config.metrics.sample_buffer);
        let sessions = Arc::new(SessionManager::new(
            config.session.max_sessions,
            metrics.clone(),
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            sessions,
            backends,
            metrics,
            prometheus: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
