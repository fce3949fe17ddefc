//! Translation dataplane server
//!
//! Provides the WebSocket and HTTP surface: audio ingress, caption and
//! audio egress, health, SLO stats, and Prometheus metrics.

pub mod http;
pub mod session;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use session::{SessionManager, SessionSummary};
pub use state::AppState;
pub use websocket::WebSocketHandler;

use thiserror::Error;

/// Server errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Session error: {0}")]
    Session(String),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session capacity reached ({0})")]
    Capacity(usize),

    #[error("Unsupported language pair: {0}")]
    UnsupportedPair(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::Capacity(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::UnsupportedPair(_) => axum::http::StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Session(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::WebSocket(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::InvalidRequest(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
