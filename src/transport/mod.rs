//! Streaming channel to the speech backend
//!
//! One persistent bidirectional connection per session: JSON control
//! messages and raw binary audio frames go out, opaque text comes back.

mod messages;
mod websocket;

pub use messages::{ControlMessage, Outbound, TransportEvent};
pub use websocket::{WebSocketConnection, WebSocketTransport};

use crate::error::TransportError;
use tokio::sync::mpsc;

/// Opens streaming connections
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    /// Open a connection; lifecycle events for it are delivered on `events`
    async fn open(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn Connection>, TransportError>;

    /// Get transport name for logging
    fn name(&self) -> &str;
}

/// One open streaming connection
pub trait Connection: Send {
    /// Whether the channel is in its open/ready sub-state
    fn is_open(&self) -> bool;

    /// Queue a message for delivery in call order
    ///
    /// Returns `false` when the message was dropped because the channel is
    /// not open. Audio is never queued for later.
    fn send(&mut self, message: Outbound) -> bool;

    /// Begin closing the channel. Idempotent.
    fn close(&mut self);
}
