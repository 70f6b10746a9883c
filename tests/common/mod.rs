// Recording fakes for the session controller's collaborators
//
// Each fake counts what was asked of it so tests can check that every
// acquired resource is released and every opened connection is closed.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use voicelink::audio::{AnalysisTap, FrameSink};
use voicelink::error::{CaptureError, HandshakeError, TransportError};
use voicelink::transport::{Connection, ControlMessage, Outbound, StreamTransport, TransportEvent};
use voicelink::{
    AudioCapture, AudioFrame, CaptureConfig, CaptureHandle, HandshakeClient, SessionComponents,
    SessionConfig, SessionController, SessionState, SessionUpdate,
};

pub const SAMPLE_RATE: u32 = 48_000;
pub const WAIT: Duration = Duration::from_secs(3);

pub fn frame(value: f32) -> AudioFrame {
    AudioFrame::new(vec![value; 16], SAMPLE_RATE)
}

// ============================================================================
// Capture
// ============================================================================

#[derive(Default)]
pub struct FakeCapture {
    /// When set, `acquire` waits for a permit before granting
    gate: Option<Arc<Notify>>,
    failure: Option<CaptureError>,
    pub acquired: AtomicUsize,
    pub released: Arc<AtomicUsize>,
    sink: tokio::sync::Mutex<Option<FrameSink>>,
    tap: Mutex<Option<AnalysisTap>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn failing(error: CaptureError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Deliver a frame, waiting until the session consumes frames
    pub async fn send(&self, frame: AudioFrame) -> bool {
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink.send(frame).await,
            None => false,
        }
    }

    /// Offer a frame the way a device callback would; dropped while disconnected
    pub async fn offer(&self, frame: AudioFrame) -> bool {
        let sink = self.sink.lock().await;
        sink.as_ref().map(|s| s.offer(frame)).unwrap_or(false)
    }

    /// End the frame sequence, as a finished file would
    pub async fn finish(&self) {
        self.sink.lock().await.take();
    }

    pub fn feed_tap(&self, samples: &[f32]) {
        if let Some(tap) = self.tap.lock().unwrap().as_ref() {
            tap.feed(samples);
        }
    }
}

#[async_trait::async_trait]
impl AudioCapture for FakeCapture {
    async fn acquire(&self, config: &CaptureConfig) -> Result<CaptureHandle, CaptureError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        let tap = AnalysisTap::new(config.analysis_size);
        let (handle, sink) = CaptureHandle::new(SAMPLE_RATE, tap.clone());
        *self.sink.lock().await = Some(sink);
        *self.tap.lock().unwrap() = Some(tap);

        let released = Arc::clone(&self.released);
        Ok(handle.with_release(move || {
            released.fetch_add(1, Ordering::SeqCst);
        }))
    }

    fn name(&self) -> &str {
        "fake capture"
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
pub struct FakeTransport {
    failure: Option<TransportError>,
    pub opened: AtomicUsize,
    pub closed: Arc<AtomicUsize>,
    pub sent: Arc<Mutex<Vec<Outbound>>>,
    open: Arc<AtomicBool>,
    events: Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(error: TransportError) -> Self {
        Self {
            failure: Some(error),
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    pub fn audio_sent(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, Outbound::Audio(_)))
            .count()
    }

    pub fn end_sessions_sent(&self) -> usize {
        self.sent()
            .iter()
            .filter(|m| matches!(m, Outbound::Control(ControlMessage::EndSession)))
            .count()
    }

    pub fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }

    /// The server drops the connection
    pub fn server_close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.emit(TransportEvent::Closed);
    }
}

#[async_trait::async_trait]
impl StreamTransport for FakeTransport {
    async fn open(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Box<dyn Connection>, TransportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        self.open.store(true, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);

        Ok(Box::new(FakeConnection {
            open: Arc::clone(&self.open),
            closed: Arc::clone(&self.closed),
            sent: Arc::clone(&self.sent),
        }))
    }

    fn name(&self) -> &str {
        "fake transport"
    }
}

struct FakeConnection {
    open: Arc<AtomicBool>,
    closed: Arc<AtomicUsize>,
    sent: Arc<Mutex<Vec<Outbound>>>,
}

impl Connection for FakeConnection {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&mut self, message: Outbound) -> bool {
        if !self.is_open() {
            return false;
        }
        self.sent.lock().unwrap().push(message);
        true
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ============================================================================
// Handshake
// ============================================================================

pub struct FakeHandshake {
    result: Result<String, HandshakeError>,
    delay: Duration,
    pub rates: Mutex<Vec<Option<u32>>>,
}

impl FakeHandshake {
    pub fn ok(session_id: &str) -> Self {
        Self {
            result: Ok(session_id.to_string()),
            delay: Duration::ZERO,
            rates: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: HandshakeError) -> Self {
        Self {
            result: Err(error),
            delay: Duration::ZERO,
            rates: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.rates.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl HandshakeClient for FakeHandshake {
    async fn negotiate(&self, sample_rate: Option<u32>) -> Result<String, HandshakeError> {
        self.rates.lock().unwrap().push(sample_rate);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone()
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub controller: SessionController,
    pub capture: Arc<FakeCapture>,
    pub transport: Arc<FakeTransport>,
    pub handshake: Arc<FakeHandshake>,
}

impl Harness {
    pub fn new(capture: FakeCapture, transport: FakeTransport, handshake: FakeHandshake) -> Self {
        Self::with_config(test_config(), capture, transport, handshake)
    }

    pub fn with_config(
        config: SessionConfig,
        capture: FakeCapture,
        transport: FakeTransport,
        handshake: FakeHandshake,
    ) -> Self {
        let capture = Arc::new(capture);
        let transport = Arc::new(transport);
        let handshake = Arc::new(handshake);

        let controller = SessionController::spawn(
            config,
            SessionComponents {
                capture: capture.clone(),
                transport: transport.clone(),
                handshake: handshake.clone(),
            },
        );

        Self {
            controller,
            capture,
            transport,
            handshake,
        }
    }

    pub fn happy() -> Self {
        Self::new(FakeCapture::new(), FakeTransport::new(), FakeHandshake::ok("s-1"))
    }

    pub async fn wait_for(&self, state: SessionState) -> SessionUpdate {
        tokio::time::timeout(WAIT, self.controller.wait_for_state(state))
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "timed out waiting for {}, controller is {}",
                    state,
                    self.controller.state()
                )
            })
            .expect("controller stopped")
    }
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        error_reset: Duration::from_millis(200),
        ..SessionConfig::default()
    }
}

/// Poll `condition` until it holds or the wait runs out
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
