use serde::{Deserialize, Serialize};

use crate::audio::AudioFrame;

/// Control messages exchanged on the streaming channel
///
/// `StartSession` and `EndSession` are client-originated and travel as JSON
/// text; `ServerEvent` wraps an inbound text payload, which is passed through
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    StartSession {
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    EndSession,
    #[serde(skip)]
    ServerEvent { payload: String },
}

impl ControlMessage {
    /// JSON text for client-originated messages; `None` for server events
    pub fn to_wire(&self) -> Option<String> {
        match self {
            ControlMessage::ServerEvent { .. } => None,
            other => serde_json::to_string(other).ok(),
        }
    }
}

/// Anything the client puts on the channel
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Control(ControlMessage),
    Audio(AudioFrame),
}

impl From<ControlMessage> for Outbound {
    fn from(message: ControlMessage) -> Self {
        Outbound::Control(message)
    }
}

impl From<AudioFrame> for Outbound {
    fn from(frame: AudioFrame) -> Self {
        Outbound::Audio(frame)
    }
}

/// Connection lifecycle notifications, delivered in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Inbound text, always a `ControlMessage::ServerEvent`
    Message(ControlMessage),
    /// Emitted at most once per connection
    Error(String),
    /// Emitted exactly once per connection, last
    Closed,
}
