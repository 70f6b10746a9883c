//! Failure taxonomy for the session lifecycle.
//!
//! Every error the controller can observe maps to exactly one user-facing
//! status line through [`SessionError::status_text`]. None of these escape the
//! controller: they are logged, shown, and the controller walks back to idle.

use thiserror::Error;

/// Shown when the microphone could not be opened for a reason other than a refused
/// permission.
pub const STATUS_START_FAILED: &str = "Error starting session.";
pub const STATUS_PERMISSION_DENIED: &str = "Microphone access denied.";
pub const STATUS_CONNECTION_ERROR: &str = "Connection error.";
pub const STATUS_CONNECTION_LOST: &str = "Connection lost.";

/// Microphone / capture graph acquisition failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("microphone access denied")]
    PermissionDenied,

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
}

/// Session negotiation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// Backend answered with a non-2xx status
    #[error("backend failed with status: {0}")]
    Status(u16),

    /// Body parsed but carried no usable `sessionId`
    #[error("failed to get session ID")]
    MissingSessionId,

    #[error("invalid handshake response: {0}")]
    InvalidBody(String),

    #[error("handshake request failed: {0}")]
    Request(String),
}

/// Streaming channel failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection closed")]
    Closed,
}

/// Umbrella error surfaced by the session controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server closed the channel while audio was streaming
    #[error("connection closed unexpectedly")]
    UnexpectedClose,
}

impl SessionError {
    /// User-facing status line for this failure.
    pub fn status_text(&self) -> String {
        match self {
            SessionError::Capture(CaptureError::PermissionDenied) => {
                STATUS_PERMISSION_DENIED.to_string()
            }
            SessionError::Capture(CaptureError::DeviceUnavailable(_)) => {
                STATUS_START_FAILED.to_string()
            }
            SessionError::Handshake(e) => format!("Failed to start session: {}", e),
            SessionError::Transport(_) => STATUS_CONNECTION_ERROR.to_string(),
            SessionError::UnexpectedClose => STATUS_CONNECTION_LOST.to_string(),
        }
    }
}
