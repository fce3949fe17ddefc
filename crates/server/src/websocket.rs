//! WebSocket handler
//!
//! One translation session per socket. The client opens with a `start`
//! control message, then streams mono PCM16 audio as binary frames (or
//! base64 text messages). Captions, translations, and synthesized audio
//! come back tagged per target language. `stop` (or socket close) triggers
//! the cooperative cancellation protocol.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use lingo_core::{pcm16_bytes, Language, SampleRate};
use lingo_pipeline::SessionEvent;

use crate::state::AppState;

/// WebSocket message types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Open a session (first message on the socket)
    Start {
        source_lang: Language,
        target_langs: Vec<Language>,
        /// Ingress sample rate in Hz (mono PCM16 required)
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Audio data (base64 PCM16); raw binary frames are also accepted
    Audio { data: String },
    /// Flush remaining audio and end the session
    Stop,
    /// Session info (server -> client)
    SessionInfo { session_id: String },
    /// Source-language caption update
    Caption {
        sequence: u64,
        interim: Vec<String>,
        confirmed: Vec<String>,
        is_final: bool,
    },
    /// Translated caption for one target
    Translation {
        target_lang: Language,
        text: String,
        confidence: f32,
        is_partial: bool,
        model_id: String,
    },
    /// Synthesized audio chunk (base64 PCM16)
    AudioOut {
        target_lang: Language,
        data: String,
        sample_rate: u32,
        sequence: u32,
        is_first_audio: bool,
        is_final: bool,
    },
    /// Error
    Error { message: String },
    /// Ping/Pong
    Ping,
    Pong,
}

fn default_sample_rate() -> u32 {
    16000
}

/// WebSocket handler
pub struct WebSocketHandler;

impl WebSocketHandler {
    /// Handle WebSocket upgrade
    pub async fn handle(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
        ws.on_upgrade(move |socket| Self::handle_socket(socket, state))
    }

    async fn handle_socket(socket: WebSocket, state: AppState) {
        let (mut sender, mut receiver) = socket.split();

        // The first message must be `start`
        let start = tokio::time::timeout(Duration::from_secs(10), receiver.next()).await;
        let (source_lang, target_langs, sample_rate, session_id) = match start {
            Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<WsMessage>(&text) {
                Ok(WsMessage::Start {
                    source_lang,
                    target_langs,
                    sample_rate,
                    session_id,
                }) => (source_lang, target_langs, sample_rate, session_id),
                Ok(_) => {
                    let _ = send(&mut sender, &WsMessage::Error {
                        message: "expected a start message".to_string(),
                    })
                    .await;
                    return;
                },
                Err(e) => {
                    let _ = send(&mut sender, &WsMessage::Error {
                        message: format!("invalid start message: {e}"),
                    })
                    .await;
                    return;
                },
            },
            _ => {
                tracing::debug!("Socket closed before start message");
                return;
            },
        };

        let Some(ingress_rate) = SampleRate::from_hz(sample_rate) else {
            let _ = send(&mut sender, &WsMessage::Error {
                message: format!("unsupported sample rate: {sample_rate}"),
            })
            .await;
            return;
        };

        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let settings = state.config.read().clone();

        let session = match state.sessions.create(
            session_id.clone(),
            source_lang,
            &target_langs,
            ingress_rate,
            &settings,
            &state.backends,
        ) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(error = %e, "Session creation refused");
                let _ = send(&mut sender, &WsMessage::Error {
                    message: e.to_string(),
                })
                .await;
                return;
            },
        };

        tracing::info!(
            session_id = %session_id,
            source = %source_lang,
            targets = ?target_langs.iter().map(|l| l.code()).collect::<Vec<_>>(),
            "WebSocket session started"
        );

        let _ = send(&mut sender, &WsMessage::SessionInfo {
            session_id: session_id.clone(),
        })
        .await;

        // Egress: pipeline events -> socket
        let events = session.take_events();
        let egress = {
            let session_id = session_id.clone();
            tokio::spawn(async move {
                let Some(mut events) = events else { return };
                while let Some(event) = events.recv().await {
                    let message = match event {
                        SessionEvent::Caption { update } => WsMessage::Caption {
                            sequence: update.sequence,
                            interim: update.interim.iter().map(|w| w.text.clone()).collect(),
                            confirmed: update
                                .newly_confirmed
                                .iter()
                                .map(|w| w.text.clone())
                                .collect(),
                            is_final: update.is_final,
                        },
                        SessionEvent::Translation { target, result } => WsMessage::Translation {
                            target_lang: target,
                            text: result.text,
                            confidence: result.confidence,
                            is_partial: result.is_partial,
                            model_id: result.model_id,
                        },
                        SessionEvent::Audio { target, chunk } => WsMessage::AudioOut {
                            target_lang: target,
                            data: BASE64.encode(pcm16_bytes(&chunk.samples)),
                            sample_rate: chunk.sample_rate.as_u32(),
                            sequence: chunk.sequence,
                            is_first_audio: chunk.is_first_audio,
                            is_final: chunk.is_final,
                        },
                        SessionEvent::Closed => break,
                    };
                    if send(&mut sender, &message).await.is_err() {
                        break;
                    }
                }
                let _ = sender.close().await;
                tracing::debug!(session_id = %session_id, "Egress task exited");
            })
        };

        // Ingress: socket -> pipeline
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Binary(data)) => {
                    if let Err(e) = session.push_audio(&pcm16_to_f32(&data)).await {
                        tracing::debug!(session_id = %session_id, error = %e, "Audio push failed");
                        break;
                    }
                },
                Ok(Message::Text(text)) => match serde_json::from_str::<WsMessage>(&text) {
                    Ok(WsMessage::Audio { data }) => match BASE64.decode(data) {
                        Ok(bytes) => {
                            if session.push_audio(&pcm16_to_f32(&bytes)).await.is_err() {
                                break;
                            }
                        },
                        Err(e) => {
                            tracing::debug!(error = %e, "Undecodable audio payload dropped");
                        },
                    },
                    Ok(WsMessage::Stop) => {
                        let _ = session.finish_input().await;
                        break;
                    },
                    Ok(WsMessage::Ping) => {
                        // Liveness is tracked by the session's activity clock
                        tracing::trace!(session_id = %session_id, "Ping");
                    },
                    Ok(other) => {
                        tracing::debug!(?other, "Ignoring unexpected client message");
                    },
                    Err(e) => {
                        tracing::debug!(error = %e, "Undecodable client message dropped");
                    },
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {},
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e, "Socket error");
                    break;
                },
            }
        }

        // Cooperative shutdown; the sweeper reaps the registry entry
        session.close();
        session.closed().await;
        let _ = state.sessions.close(&session_id);
        let _ = egress.await;
        tracing::info!(session_id = %session_id, "WebSocket session ended");
    }
}

async fn send(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &WsMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message)
        .map_err(|e| axum::Error::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    sender.send(Message::Text(text)).await
}

fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_message_parses() {
        let text = r#"{"type":"start","source_lang":"en","target_langs":["es","fr"],"sample_rate":48000}"#;
        let message: WsMessage = serde_json::from_str(text).unwrap();
        match message {
            WsMessage::Start {
                source_lang,
                target_langs,
                sample_rate,
                session_id,
            } => {
                assert_eq!(source_lang, Language::English);
                assert_eq!(target_langs, vec![Language::Spanish, Language::French]);
                assert_eq!(sample_rate, 48000);
                assert!(session_id.is_none());
            },
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_start_defaults_sample_rate() {
        let text = r#"{"type":"start","source_lang":"en","target_langs":["es"]}"#;
        let message: WsMessage = serde_json::from_str(text).unwrap();
        assert!(matches!(message, WsMessage::Start { sample_rate: 16000, .. }));
    }

    #[test]
    fn test_pcm16_round_trip() {
        let samples = vec![0.5f32, -0.25, 0.0];
        let bytes = pcm16_bytes(&samples);
        let back = pcm16_to_f32(&bytes);
        for (a, b) in samples.iter().zip(back.iter()) {
            assert!((a - b).abs() < 1e-3);
        }
    }
}
