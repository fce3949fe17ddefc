//! Session management
//!
//! In-memory registry of live session pipelines with capacity enforcement
//! and an idle sweeper. Sessions do not survive restarts; their context
//! dies with them.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lingo_config::Settings;
use lingo_core::{Language, SampleRate};
use lingo_pipeline::{
    MetricsSink, PipelineBackends, PipelineError, SessionHandle, SessionPipeline, SessionState,
};

use crate::ServerError;

/// Serializable session summary for the HTTP surface
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub source_lang: Language,
    pub target_langs: Vec<Language>,
    pub state: SessionState,
    pub idle_ms: u64,
    pub degraded: bool,
}

/// Session registry
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    max_sessions: usize,
    metrics: MetricsSink,
}

impl SessionManager {
    pub fn new(max_sessions: usize, metrics: MetricsSink) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            metrics,
        }
    }

    /// Create and register a session pipeline.
    ///
    /// Refusal of an unsupported language pair affects only this request;
    /// existing sessions keep running.
    pub fn create(
        &self,
        id: impl Into<String>,
        source_lang: Language,
        target_langs: &[Language],
        ingress_rate: SampleRate,
        settings: &Settings,
        backends: &PipelineBackends,
    ) -> Result<Arc<SessionHandle>, ServerError> {
        let id = id.into();
        {
            let sessions = self.sessions.read();
            if sessions.len() >= self.max_sessions {
                return Err(ServerError::Capacity(self.max_sessions));
            }
            if sessions.contains_key(&id) {
                return Err(ServerError::Session(format!("session {id} already exists")));
            }
        }

        let handle = SessionPipeline::spawn(
            id.clone(),
            source_lang,
            target_langs,
            ingress_rate,
            settings,
            backends,
            self.metrics.clone(),
        )
        .map_err(|e| match e {
            PipelineError::Core(lingo_core::Error::UnsupportedPair { src_lang, target }) => {
                ServerError::UnsupportedPair(format!("{src_lang}->{target}"))
            },
            PipelineError::Session(msg) if msg.contains("no synthesis engine") => {
                ServerError::UnsupportedPair(msg)
            },
            other => ServerError::Internal(other.to_string()),
        })?;

        let handle = Arc::new(handle);
        self.sessions.write().insert(id, handle.clone());
        Ok(handle)
    }

    pub fn get(&self, id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(id).cloned()
    }

    /// Close a session and remove it from the registry
    pub fn close(&self, id: &str) -> Result<(), ServerError> {
        let handle = self
            .sessions
            .write()
            .remove(id)
            .ok_or_else(|| ServerError::NotFound(id.to_string()))?;
        handle.close();
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<SessionSummary> {
        self.sessions
            .read()
            .values()
            .map(|handle| SessionSummary {
                id: handle.id().to_string(),
                source_lang: handle.source_lang(),
                target_langs: handle.target_langs().to_vec(),
                state: handle.state(),
                idle_ms: handle.idle_for().as_millis() as u64,
                degraded: handle.is_degraded(),
            })
            .collect()
    }

    /// Close idle sessions and drop closed ones. Called by the sweeper.
    pub fn sweep(&self, idle_timeout: Duration) {
        let mut to_remove = Vec::new();
        {
            let sessions = self.sessions.read();
            for (id, handle) in sessions.iter() {
                match handle.state() {
                    SessionState::Closed => to_remove.push(id.clone()),
                    SessionState::Active if handle.idle_for() > idle_timeout => {
                        tracing::info!(session_id = %id, "Closing idle session");
                        handle.close();
                    },
                    _ => {},
                }
            }
        }
        if !to_remove.is_empty() {
            let mut sessions = self.sessions.write();
            for id in &to_remove {
                sessions.remove(id);
                self.metrics.forget_session(id);
            }
            tracing::debug!(removed = to_remove.len(), "Swept closed sessions");
        }
    }

    /// Spawn the periodic idle sweeper
    pub fn start_sweeper(self: &Arc<Self>, idle_timeout: Duration) {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(5));
            loop {
                ticker.tick().await;
                manager.sweep(idle_timeout);
            }
        });
    }
}
