use chrono::{DateTime, Utc};
use serde::Serialize;

use super::state::SessionState;

/// Statistics about the current (or most recent) session
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    /// Controller state when the stats were taken
    pub state: SessionState,

    /// Backend-issued id, once negotiated
    pub session_id: Option<String>,

    /// When streaming started
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since streaming started
    pub duration_secs: f64,

    /// Audio frames handed to the transport
    pub frames_sent: u64,

    /// Payload bytes of those frames
    pub bytes_sent: u64,

    /// Frames dropped because the channel was not open
    pub frames_dropped: u64,

    /// Server messages received
    pub server_events: u64,
}

impl SessionStats {
    pub(crate) fn snapshot(&self, state: SessionState) -> SessionStats {
        let duration_secs = self
            .started_at
            .map(|t| Utc::now().signed_duration_since(t).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0);

        SessionStats {
            state,
            duration_secs,
            ..self.clone()
        }
    }
}
