use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Binary frames received between two progress replies
pub const DEFAULT_REPLY_EVERY: u64 = 10;

/// What the mock backend remembers about a negotiated session
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MockSession {
    pub session_id: String,
    pub sample_rate: Option<u32>,
    pub created_at: DateTime<Utc>,
    /// Whether a `start_session` for this id has arrived on a socket
    pub streaming: bool,
    pub frames_received: u64,
    pub bytes_received: u64,
    pub ended: bool,
}

impl MockSession {
    pub fn new(session_id: String, sample_rate: Option<u32>) -> Self {
        Self {
            session_id,
            sample_rate,
            created_at: Utc::now(),
            streaming: false,
            frames_received: 0,
            bytes_received: 0,
            ended: false,
        }
    }
}

/// Shared application state for HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    /// Negotiated sessions (session_id → session)
    pub sessions: Arc<RwLock<HashMap<String, MockSession>>>,

    /// Send a progress text every this many binary frames
    pub reply_every: u64,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            reply_every: DEFAULT_REPLY_EVERY,
        }
    }

    pub fn with_reply_every(mut self, frames: u64) -> Self {
        self.reply_every = frames.max(1);
        self
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
