//! Session negotiation
//!
//! A single `POST` to the backend's session endpoint that yields the session
//! identifier required before any audio may be streamed. There is no retry
//! here; one failed attempt is reported as is.

use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::HandshakeError;

/// Obtains a session identifier from the backend
#[async_trait::async_trait]
pub trait HandshakeClient: Send + Sync {
    /// Negotiate a session, optionally announcing the capture sample rate
    async fn negotiate(&self, sample_rate: Option<u32>) -> Result<String, HandshakeError>;
}

/// Request body for the session endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub sample_rate: u32,
}

/// Response body from the session endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    #[serde(default)]
    pub session_id: Option<String>,
}

impl SessionResponse {
    /// Extract the session id, treating a missing or blank one as a failure
    pub fn into_session_id(self) -> Result<String, HandshakeError> {
        match self.session_id {
            Some(id) if !id.trim().is_empty() => Ok(id),
            _ => Err(HandshakeError::MissingSessionId),
        }
    }
}

/// HTTP handshake against `POST {backend}/api/realtime-session`
pub struct HttpHandshake {
    client: reqwest::Client,
    url: String,
}

impl HttpHandshake {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, HandshakeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HandshakeError::Request(e.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl HandshakeClient for HttpHandshake {
    async fn negotiate(&self, sample_rate: Option<u32>) -> Result<String, HandshakeError> {
        info!("Negotiating session with {}", self.url);

        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(sample_rate) = sample_rate {
            request = request.json(&SessionRequest { sample_rate });
        }

        let response = request
            .send()
            .await
            .map_err(|e| HandshakeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!("Session endpoint answered {}", status);
            return Err(HandshakeError::Status(status.as_u16()));
        }

        let body: SessionResponse = response
            .json()
            .await
            .map_err(|e| HandshakeError::InvalidBody(e.to_string()))?;

        let session_id = body.into_session_id()?;
        info!("Realtime session: {}", session_id);
        Ok(session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body_is_camel_case() {
        let json = serde_json::to_string(&SessionRequest { sample_rate: 48000 }).unwrap();
        assert_eq!(json, r#"{"sampleRate":48000}"#);
    }

    #[test]
    fn test_response_with_session_id() {
        let body: SessionResponse = serde_json::from_str(r#"{"sessionId":"s-42"}"#).unwrap();
        assert_eq!(body.into_session_id().unwrap(), "s-42");
    }

    #[test]
    fn test_empty_response_is_missing_id() {
        let body: SessionResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(body.into_session_id(), Err(HandshakeError::MissingSessionId));
    }

    #[test]
    fn test_blank_session_id_is_missing_id() {
        let body: SessionResponse = serde_json::from_str(r#"{"sessionId":"  "}"#).unwrap();
        assert_eq!(body.into_session_id(), Err(HandshakeError::MissingSessionId));
    }
}
