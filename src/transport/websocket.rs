use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::messages::{ControlMessage, Outbound, TransportEvent};
use super::{Connection, StreamTransport};
use crate::error::TransportError;

/// How long a closing connection waits for the peer's close reply
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// WebSocket streaming transport
pub struct WebSocketTransport {
    url: String,
    close_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    /// Bound the wait for the peer's close reply before the socket is dropped
    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }
}

#[async_trait::async_trait]
impl StreamTransport for WebSocketTransport {
    async fn open(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn Connection>, TransportError> {
        info!("Connecting to {}", self.url);

        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        info!("Connected to {}", self.url);

        let (mut sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let lifecycle = Arc::new(Lifecycle::new(events));

        // Writer: drains queued messages in order, then closes the sink
        let writer_state = Arc::clone(&lifecycle);
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    writer_state.error(e.to_string());
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = sink.close().await;
            debug!("WebSocket writer finished");
        });

        // Reader: forwards text as server events until the peer goes away
        let reader_state = Arc::clone(&lifecycle);
        let reader = tokio::spawn(async move {
            while let Some(item) = source.next().await {
                match item {
                    Ok(Message::Text(text)) => {
                        reader_state.message(text.to_string());
                    }
                    Ok(Message::Binary(data)) => {
                        debug!("Ignoring {} byte binary message from server", data.len());
                    }
                    Ok(Message::Close(frame)) => {
                        debug!("Server closed the connection: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        reader_state.error(e.to_string());
                        break;
                    }
                }
            }
            reader_state.closed();
        });

        Ok(Box::new(WebSocketConnection {
            outbound: Some(outbound_tx),
            lifecycle,
            tasks: Some((writer, reader)),
            close_timeout: self.close_timeout,
        }))
    }

    fn name(&self) -> &str {
        "WebSocket"
    }
}

struct Lifecycle {
    open: AtomicBool,
    ending: Mutex<Ending>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Default)]
struct Ending {
    errored: bool,
    closed: bool,
}

impl Lifecycle {
    fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            open: AtomicBool::new(true),
            ending: Mutex::new(Ending::default()),
            events,
        }
    }

    fn ending(&self) -> MutexGuard<'_, Ending> {
        self.ending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn message(&self, payload: String) {
        let _ = self
            .events
            .send(TransportEvent::Message(ControlMessage::ServerEvent { payload }));
    }

    /// Errors after the close event are logged only
    fn error(&self, description: String) {
        self.open.store(false, Ordering::SeqCst);
        let mut ending = self.ending();
        if ending.errored || ending.closed {
            debug!("Suppressing WebSocket error: {}", description);
            return;
        }
        ending.errored = true;
        warn!("WebSocket error: {}", description);
        let _ = self.events.send(TransportEvent::Error(description));
    }

    fn closed(&self) {
        self.open.store(false, Ordering::SeqCst);
        let mut ending = self.ending();
        if !ending.closed {
            ending.closed = true;
            info!("WebSocket disconnected");
            let _ = self.events.send(TransportEvent::Closed);
        }
    }
}

/// An open WebSocket connection
///
/// Closing sends a close frame and gives the peer `close_timeout` to answer;
/// after that both socket tasks are aborted, so the socket never outlives
/// the connection by more than that bound.
pub struct WebSocketConnection {
    outbound: Option<mpsc::UnboundedSender<Message>>,
    lifecycle: Arc<Lifecycle>,
    tasks: Option<(JoinHandle<()>, JoinHandle<()>)>,
    close_timeout: Duration,
}

impl Connection for WebSocketConnection {
    fn is_open(&self) -> bool {
        self.outbound.is_some() && self.lifecycle.open.load(Ordering::SeqCst)
    }

    fn send(&mut self, message: Outbound) -> bool {
        if !self.is_open() {
            return false;
        }

        let message = match message {
            Outbound::Audio(frame) => Message::Binary(frame.to_le_bytes()),
            Outbound::Control(control) => match control.to_wire() {
                Some(text) => Message::Text(text),
                None => {
                    warn!("Refusing to send a server event upstream");
                    return false;
                }
            },
        };

        match &self.outbound {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    fn close(&mut self) {
        if let Some(tx) = self.outbound.take() {
            debug!("Closing WebSocket");
            self.lifecycle.open.store(false, Ordering::SeqCst);
            let _ = tx.send(Message::Close(None));
        }

        let Some((writer, mut reader)) = self.tasks.take() else {
            return;
        };
        let lifecycle = Arc::clone(&self.lifecycle);
        let close_timeout = self.close_timeout;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if tokio::time::timeout(close_timeout, &mut reader).await.is_err() {
                        warn!("Peer did not answer close within {:?}, dropping socket", close_timeout);
                        reader.abort();
                    }
                    writer.abort();
                    lifecycle.closed();
                });
            }
            Err(_) => {
                writer.abort();
                reader.abort();
                lifecycle.closed();
            }
        }
    }
}

impl Drop for WebSocketConnection {
    fn drop(&mut self) {
        self.close();
    }
}
