use super::state::{AppState, MockSession};
use crate::handshake::{SessionRequest, SessionResponse};
use crate::transport::ControlMessage;
use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use tracing::{debug, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/realtime-session
/// Negotiate a new session. The body is optional; an empty one means no sample rate.
pub async fn create_session(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let sample_rate = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice::<SessionRequest>(&body) {
            Ok(request) => Some(request.sample_rate),
            Err(e) => {
                warn!("Rejecting session request: {}", e);
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: format!("Invalid session request: {}", e),
                    }),
                )
                    .into_response();
            }
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    info!("Created session {} (sample rate: {:?})", session_id, sample_rate);

    {
        let mut sessions = state.sessions.write().await;
        sessions.insert(
            session_id.clone(),
            MockSession::new(session_id.clone(), sample_rate),
        );
    }

    (
        StatusCode::OK,
        Json(SessionResponse {
            session_id: Some(session_id),
        }),
    )
        .into_response()
}

/// GET /api/sessions/:session_id
/// What the backend has seen for a session so far
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    let sessions = state.sessions.read().await;

    match sessions.get(&session_id) {
        Some(session) => (StatusCode::OK, Json(session.clone())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Session {} not found", session_id),
            }),
        )
            .into_response(),
    }
}

/// GET /
/// Streaming channel
pub async fn stream_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_stream(socket, state))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn handle_stream(mut socket: WebSocket, state: AppState) {
    let mut active: Option<String> = None;
    let mut frames: u64 = 0;

    while let Some(message) = socket.recv().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                warn!("Stream socket error: {}", e);
                break;
            }
        };

        let reply = match message {
            Message::Text(text) => match serde_json::from_str::<ControlMessage>(&text) {
                Ok(ControlMessage::StartSession { session_id }) => {
                    start_stream(&state, &session_id, &mut active).await
                }
                Ok(ControlMessage::EndSession) => {
                    end_stream(&state, active.take(), frames).await;
                    Some("Session ended".to_string())
                }
                Ok(other) => {
                    debug!("Ignoring {:?}", other);
                    None
                }
                Err(e) => {
                    warn!("Unrecognised control message: {}", e);
                    Some(format!("Unrecognised message: {}", e))
                }
            },
            Message::Binary(data) => {
                let Some(session_id) = active.as_ref() else {
                    warn!("Audio before start_session, dropping {} bytes", data.len());
                    continue;
                };
                frames += 1;
                record_frame(&state, session_id, data.len()).await;

                if frames % state.reply_every == 0 {
                    Some(format!("Received {} frames", frames))
                } else {
                    None
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => None,
        };

        if let Some(reply) = reply {
            if socket.send(Message::Text(reply)).await.is_err() {
                break;
            }
        }
    }

    if let Some(session_id) = active {
        end_stream(&state, Some(session_id), frames).await;
    }
    debug!("Stream socket closed");
}

async fn start_stream(
    state: &AppState,
    session_id: &str,
    active: &mut Option<String>,
) -> Option<String> {
    let mut sessions = state.sessions.write().await;
    match sessions.get_mut(session_id) {
        Some(session) => {
            session.streaming = true;
            *active = Some(session_id.to_string());
            info!("Streaming started for session {}", session_id);
            Some("Session started".to_string())
        }
        None => {
            warn!("start_session for unknown session {}", session_id);
            Some(format!("Unknown session {}", session_id))
        }
    }
}

async fn record_frame(state: &AppState, session_id: &str, bytes: usize) {
    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(session_id) {
        session.frames_received += 1;
        session.bytes_received += bytes as u64;
    }
}

async fn end_stream(state: &AppState, session_id: Option<String>, frames: u64) {
    let Some(session_id) = session_id else {
        return;
    };
    let mut sessions = state.sessions.write().await;
    if let Some(session) = sessions.get_mut(&session_id) {
        session.streaming = false;
        session.ended = true;
    }
    info!("Session {} ended after {} frames", session_id, frames);
}
