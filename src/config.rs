use anyhow::{Context, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::backend::MAX_ANALYSIS_SIZE;
use crate::audio::{
    AudioCapture, AudioSource, CaptureConfig, CaptureFactory, MeterConfig, NoCapture,
};
use crate::handshake::HttpHandshake;
use crate::session::{SessionComponents, SessionConfig, SessionMode};
use crate::transport::WebSocketTransport;

/// Environment variables override file settings, e.g. `VOICELINK_BACKEND__STREAM_URL`
pub const ENV_PREFIX: &str = "VOICELINK";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub backend: BackendConfig,
    pub audio: AudioConfig,
    pub meter: MeterConfig,
    pub session: SessionSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Negotiation endpoint
    pub session_url: String,
    /// WebSocket endpoint for the streaming channel
    pub stream_url: String,
    pub send_sample_rate: bool,
    pub request_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            session_url: "http://127.0.0.1:8787/api/realtime-session".to_string(),
            stream_url: "ws://127.0.0.1:8787/".to_string(),
            send_sample_rate: true,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub frame_size: usize,
    /// Preferred input rate; the device default when unset
    pub sample_rate: Option<u32>,
    pub analysis_size: usize,
    /// `microphone` or `file:<path>`
    pub source: String,
    /// Pace file playback at real time
    pub file_realtime: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        let capture = CaptureConfig::default();
        Self {
            frame_size: capture.frame_size,
            sample_rate: capture.sample_rate,
            analysis_size: capture.analysis_size,
            source: "microphone".to_string(),
            file_realtime: true,
        }
    }
}

impl AudioConfig {
    /// Parse `source` into an [`AudioSource`]
    pub fn audio_source(&self) -> Result<AudioSource> {
        let source = self.source.trim();
        if source.eq_ignore_ascii_case("microphone") {
            return Ok(AudioSource::Microphone);
        }
        match source.strip_prefix("file:") {
            Some(path) if !path.is_empty() => Ok(AudioSource::File {
                path: path.to_string(),
                realtime: self.file_realtime,
            }),
            _ => anyhow::bail!(
                "Unknown audio source '{}', expected 'microphone' or 'file:<path>'",
                self.source
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    pub mode: SessionMode,
    /// Defaults to 3000 when streaming, 1500 in handshake-only mode
    pub error_reset_ms: Option<u64>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            mode: SessionMode::Streaming,
            error_reset_ms: None,
        }
    }
}

impl ClientConfig {
    /// Load from an optional file, then apply `VOICELINK_*` overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Session controller settings derived from this config
    pub fn session_config(&self) -> SessionConfig {
        let mut config = match self.session.mode {
            SessionMode::Streaming => SessionConfig::default(),
            SessionMode::HandshakeOnly => SessionConfig::handshake_only(),
        };

        config.capture = CaptureConfig {
            frame_size: self.audio.frame_size.max(1),
            sample_rate: self.audio.sample_rate,
            analysis_size: self.audio.analysis_size.clamp(1, MAX_ANALYSIS_SIZE),
        };
        config.meter = self.meter.clone();
        if self.session.mode == SessionMode::Streaming {
            config.send_sample_rate = self.backend.send_sample_rate;
        }
        if let Some(ms) = self.session.error_reset_ms {
            config.error_reset = Duration::from_millis(ms);
        }
        config
    }

    /// Build the production capture, transport and handshake
    ///
    /// Handshake-only sessions get no capture, so they run without an input device.
    pub fn components(&self) -> Result<SessionComponents> {
        let capture: Arc<dyn AudioCapture> = match self.session.mode {
            SessionMode::Streaming => CaptureFactory::create(&self.audio.audio_source()?)?,
            SessionMode::HandshakeOnly => Arc::new(NoCapture),
        };
        let handshake = HttpHandshake::new(
            self.backend.session_url.clone(),
            Duration::from_millis(self.backend.request_timeout_ms),
        )?;
        let transport = WebSocketTransport::new(self.backend.stream_url.clone());

        Ok(SessionComponents {
            capture,
            transport: Arc::new(transport),
            handshake: Arc::new(handshake),
        })
    }
}
