use chrono::{DateTime, Utc};
use serde::Serialize;

pub const STATUS_IDLE: &str = "Click to start";
pub const STATUS_CONNECTING: &str = "Connecting...";
pub const STATUS_SPEAK_NOW: &str = "Speak now...";
pub const STATUS_LISTENING: &str = "Listening...";

/// Lifecycle state of a session controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Idle,
    AcquiringMedia,
    Handshaking,
    Streaming,
    Closing,
    Error,
}

impl SessionState {
    /// Whether a start request would be ignored in this state
    pub fn is_busy(self) -> bool {
        self != SessionState::Idle
    }

    pub fn label(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::AcquiringMedia => "acquiring_media",
            SessionState::Handshaking => "handshaking",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One negotiated streaming interaction
///
/// The id is fixed at construction; there is no way to change it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: String,
    sample_rate: Option<u32>,
    started_at: DateTime<Utc>,
}

impl Session {
    pub(crate) fn new(id: String, sample_rate: Option<u32>) -> Self {
        Self {
            id,
            sample_rate,
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

/// What the presentation layer renders
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionUpdate {
    pub state: SessionState,
    pub status_text: String,
    /// Normalized level in [0, 1]; zero outside of streaming
    pub amplitude: f32,
}

impl SessionUpdate {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            status_text: STATUS_IDLE.to_string(),
            amplitude: 0.0,
        }
    }
}
