use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::{CaptureConfig, MeterConfig};

/// How much of the pipeline a session runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Capture, negotiate, stream
    #[default]
    Streaming,
    /// Negotiate only: no microphone, no streaming channel
    HandshakeOnly,
}

/// Configuration for a session controller
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: SessionMode,

    pub capture: CaptureConfig,

    pub meter: MeterConfig,

    /// Announce the capture sample rate during negotiation
    pub send_sample_rate: bool,

    /// How long a failure stays on screen before returning to idle
    /// Default: 3 seconds (1.5 seconds in handshake-only mode)
    pub error_reset: Duration,
}

impl SessionConfig {
    pub fn handshake_only() -> Self {
        Self {
            mode: SessionMode::HandshakeOnly,
            send_sample_rate: false,
            error_reset: Duration::from_millis(1500),
            ..Self::default()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Streaming,
            capture: CaptureConfig::default(),
            meter: MeterConfig::default(),
            send_sample_rate: true,
            error_reset: Duration::from_secs(3),
        }
    }
}
