use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::config::{SessionConfig, SessionMode};
use super::state::{
    Session, SessionState, SessionUpdate, STATUS_CONNECTING, STATUS_IDLE, STATUS_LISTENING,
    STATUS_SPEAK_NOW,
};
use super::stats::SessionStats;
use crate::audio::{AudioCapture, AudioFrame, CaptureHandle, LevelMeter};
use crate::error::{CaptureError, HandshakeError, SessionError, TransportError};
use crate::handshake::HandshakeClient;
use crate::transport::{Connection, ControlMessage, Outbound, StreamTransport, TransportEvent};

/// Updates buffered per subscriber before the slowest one starts lagging
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// A start callback the embedding layer can hand to its own triggers
pub type Trigger = Arc<dyn Fn() + Send + Sync>;

/// Collaborators driven by the controller
#[derive(Clone)]
pub struct SessionComponents {
    pub capture: Arc<dyn AudioCapture>,
    pub transport: Arc<dyn StreamTransport>,
    pub handshake: Arc<dyn HandshakeClient>,
}

/// Handle to a running session state machine
///
/// Every method returns immediately; the state machine itself runs on its
/// own task and is the only owner of the microphone, the connection and the
/// session record. Cloning the handle is cheap.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<Command>,
    updates: broadcast::Sender<SessionUpdate>,
    latest: watch::Receiver<SessionUpdate>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SessionController {
    /// Spawn the state machine on the current tokio runtime
    pub fn spawn(config: SessionConfig, components: SessionComponents) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let (latest_tx, latest_rx) = watch::channel(SessionUpdate::idle());

        info!(
            "Session controller started ({:?} mode, capture: {}, transport: {})",
            config.mode,
            components.capture.name(),
            components.transport.name()
        );

        let driver = Driver {
            meter: LevelMeter::new(config.meter.clone()),
            config,
            components,
            commands: commands_rx,
            completions_tx,
            completions: completions_rx,
            updates: updates.clone(),
            latest: latest_tx,
            state: SessionState::Idle,
            status_text: STATUS_IDLE.to_string(),
            amplitude: 0.0,
            generation: 0,
            attempt: Attempt::default(),
            stats: SessionStats::default(),
        };

        let task = tokio::spawn(driver.run());

        Self {
            commands: commands_tx,
            updates,
            latest: latest_rx,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Begin a session. Ignored unless idle.
    pub fn start(&self) {
        self.send(Command::Start);
    }

    /// End the session from whatever state it is in. Idempotent.
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Start when idle, stop otherwise
    pub fn toggle(&self) {
        self.send(Command::Toggle);
    }

    /// Start callback for registration with external triggers
    pub fn trigger(&self) -> Trigger {
        let controller = self.clone();
        Arc::new(move || controller.start())
    }

    /// Subscribe to every state, status and amplitude change
    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.updates.subscribe()
    }

    /// Latest published update
    pub fn current(&self) -> SessionUpdate {
        self.latest.borrow().clone()
    }

    pub fn state(&self) -> SessionState {
        self.latest.borrow().state
    }

    /// Wait until the controller reports `state`
    ///
    /// Transient states may be skipped by this view; use [`SessionController::subscribe`]
    /// to observe every transition. Returns `None` if the controller shut down first.
    pub async fn wait_for_state(&self, state: SessionState) -> Option<SessionUpdate> {
        let mut latest = self.latest.clone();
        let update = latest.wait_for(|update| update.state == state).await.ok()?;
        Some(update.clone())
    }

    /// Statistics for the current or most recent session
    pub async fn stats(&self) -> Option<SessionStats> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stats(tx));
        rx.await.ok()
    }

    /// Stop any session and wait for the state machine to exit
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown);

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Session controller task panicked: {}", e);
            }
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!("Session controller is no longer running");
        }
    }
}

enum Command {
    Start,
    Stop,
    Toggle,
    Stats(oneshot::Sender<SessionStats>),
    Shutdown,
}

/// Result of a suspended operation, delivered back to the state machine
enum Completion {
    CaptureAcquired(Result<CaptureHandle, CaptureError>),
    TransportOpened {
        result: Result<Box<dyn Connection>, TransportError>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    },
    Negotiated(Result<String, HandshakeError>),
    Level(f32),
    ErrorTimeout,
}

/// A completion stamped with the attempt that started it
struct Tagged {
    generation: u64,
    completion: Completion,
}

/// Resources held by the live attempt
#[derive(Default)]
struct Attempt {
    capture: Option<CaptureHandle>,
    connection: Option<Box<dyn Connection>>,
    transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    frames: Option<mpsc::Receiver<AudioFrame>>,
    session: Option<Session>,
    /// `StartSession` has been queued on the connection
    started: bool,
}

struct Driver {
    config: SessionConfig,
    components: SessionComponents,
    commands: mpsc::UnboundedReceiver<Command>,
    completions_tx: mpsc::UnboundedSender<Tagged>,
    completions: mpsc::UnboundedReceiver<Tagged>,
    updates: broadcast::Sender<SessionUpdate>,
    latest: watch::Sender<SessionUpdate>,
    state: SessionState,
    status_text: String,
    amplitude: f32,
    /// Bumped whenever the live attempt is abandoned; older completions are stale
    generation: u64,
    attempt: Attempt,
    meter: LevelMeter,
    stats: SessionStats,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.stop();
                        break;
                    }
                    Some(command) => self.handle_command(command),
                },
                Some(tagged) = self.completions.recv() => self.handle_completion(tagged),
                event = next_transport_event(&mut self.attempt.transport_events) => {
                    self.handle_transport_event(event);
                }
                frame = next_frame(&mut self.attempt.frames) => self.handle_frame(frame),
            }
        }

        info!("Session controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::Toggle => {
                if self.state == SessionState::Idle {
                    self.start();
                } else {
                    self.stop();
                }
            }
            Command::Stats(reply) => {
                let _ = reply.send(self.stats.snapshot(self.state));
            }
            Command::Shutdown => self.stop(),
        }
    }

    fn start(&mut self) {
        if self.state.is_busy() {
            debug!("Start ignored while {}", self.state);
            return;
        }

        self.generation += 1;
        self.stats = SessionStats::default();
        self.amplitude = 0.0;

        match self.config.mode {
            SessionMode::Streaming => {
                self.transition(SessionState::AcquiringMedia, STATUS_CONNECTING);
                let capture = Arc::clone(&self.components.capture);
                let config = self.config.capture.clone();
                self.spawn_completion(async move {
                    Completion::CaptureAcquired(capture.acquire(&config).await)
                });
            }
            SessionMode::HandshakeOnly => {
                self.transition(SessionState::Handshaking, STATUS_CONNECTING);
                self.negotiate(None);
            }
        }
    }

    fn stop(&mut self) {
        match self.state {
            SessionState::Idle => debug!("Stop ignored, already idle"),
            SessionState::Streaming => self.close_session(None),
            SessionState::AcquiringMedia
            | SessionState::Handshaking
            | SessionState::Closing
            | SessionState::Error => {
                info!("Cancelling session while {}", self.state);
                self.abandon_attempt();
                self.transition(SessionState::Idle, STATUS_IDLE);
            }
        }
    }

    fn handle_completion(&mut self, tagged: Tagged) {
        if tagged.generation != self.generation {
            discard_stale(tagged.completion);
            return;
        }

        match tagged.completion {
            Completion::CaptureAcquired(Ok(handle)) => self.on_capture_acquired(handle),
            Completion::CaptureAcquired(Err(e)) => self.fail(e.into()),
            Completion::TransportOpened {
                result: Ok(connection),
                events,
            } => self.on_transport_open(connection, events),
            Completion::TransportOpened { result: Err(e), .. } => self.fail(e.into()),
            Completion::Negotiated(Ok(session_id)) => self.on_negotiated(session_id),
            Completion::Negotiated(Err(e)) => self.fail(e.into()),
            Completion::Level(level) => {
                if self.state == SessionState::Streaming {
                    self.amplitude = level;
                    self.publish();
                }
            }
            Completion::ErrorTimeout => {
                if self.state == SessionState::Error {
                    self.abandon_attempt();
                    self.transition(SessionState::Idle, STATUS_IDLE);
                }
            }
        }
    }

    fn on_capture_acquired(&mut self, capture: CaptureHandle) {
        info!(
            "Capture acquired via {} ({}Hz)",
            self.components.capture.name(),
            capture.sample_rate()
        );
        self.attempt.capture = Some(capture);
        self.transition(SessionState::Handshaking, STATUS_CONNECTING);

        let transport = Arc::clone(&self.components.transport);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        self.spawn_completion(async move {
            Completion::TransportOpened {
                result: transport.open(events_tx).await,
                events: events_rx,
            }
        });
    }

    fn on_transport_open(
        &mut self,
        connection: Box<dyn Connection>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        info!("Streaming channel open, negotiating session");
        self.attempt.connection = Some(connection);
        self.attempt.transport_events = Some(events);

        let sample_rate = if self.config.send_sample_rate {
            self.attempt.capture.as_ref().map(|c| c.sample_rate())
        } else {
            None
        };
        self.negotiate(sample_rate);
    }

    fn negotiate(&mut self, sample_rate: Option<u32>) {
        let handshake = Arc::clone(&self.components.handshake);
        self.spawn_completion(async move {
            Completion::Negotiated(handshake.negotiate(sample_rate).await)
        });
    }

    fn on_negotiated(&mut self, session_id: String) {
        let sample_rate = self.attempt.capture.as_ref().map(|c| c.sample_rate());
        let session = Session::new(session_id, sample_rate);
        match session.sample_rate() {
            Some(rate) => info!("Session negotiated: {} ({}Hz)", session.id(), rate),
            None => info!("Session negotiated: {}", session.id()),
        }

        self.stats.session_id = Some(session.id().to_string());

        if self.config.mode == SessionMode::HandshakeOnly {
            self.stats.started_at = Some(session.started_at());
            self.attempt.session = Some(session);
            self.transition(SessionState::Streaming, STATUS_LISTENING);
            return;
        }

        let start = ControlMessage::StartSession {
            session_id: session.id().to_string(),
        };
        let queued = match self.attempt.connection.as_mut() {
            Some(connection) if connection.is_open() => connection.send(start.into()),
            _ => false,
        };
        if !queued {
            self.fail(TransportError::Closed.into());
            return;
        }
        self.attempt.started = true;

        // Frames flow only once StartSession is queued ahead of them
        let Some(capture) = self.attempt.capture.as_mut() else {
            self.fail(CaptureError::DeviceUnavailable("capture released".to_string()).into());
            return;
        };
        self.attempt.frames = capture.take_frames();

        let generation = self.generation;
        let completions = self.completions_tx.clone();
        self.meter.start(capture.tap(), move |level| {
            let _ = completions.send(Tagged {
                generation,
                completion: Completion::Level(level),
            });
        });

        self.stats.started_at = Some(Utc::now());
        self.attempt.session = Some(session);
        self.transition(SessionState::Streaming, STATUS_SPEAK_NOW);
    }

    fn handle_frame(&mut self, frame: Option<AudioFrame>) {
        let Some(frame) = frame else {
            self.attempt.frames = None;
            if self.state == SessionState::Streaming {
                info!("Capture ended, closing session");
                self.close_session(None);
            }
            return;
        };

        let bytes = (frame.len() * std::mem::size_of::<f32>()) as u64;
        let sent = match self.attempt.connection.as_mut() {
            Some(connection) if self.state == SessionState::Streaming => {
                connection.send(Outbound::Audio(frame))
            }
            _ => false,
        };

        if sent {
            self.stats.frames_sent += 1;
            self.stats.bytes_sent += bytes;
        } else {
            self.stats.frames_dropped += 1;
            trace!("Dropped audio frame, channel not open");
        }
    }

    fn handle_transport_event(&mut self, event: Option<TransportEvent>) {
        match event {
            Some(TransportEvent::Message(ControlMessage::ServerEvent { payload })) => {
                self.stats.server_events += 1;
                info!("Received from server: {}", payload);
                if matches!(self.state, SessionState::Handshaking | SessionState::Streaming) {
                    self.status_text = payload;
                    self.publish();
                }
            }
            Some(TransportEvent::Message(other)) => {
                debug!("Ignoring unexpected control message: {:?}", other);
            }
            Some(TransportEvent::Error(description)) => {
                let error = SessionError::from(TransportError::Connection(description));
                match self.state {
                    SessionState::Streaming => self.close_session(Some(error)),
                    SessionState::Handshaking => self.fail(error),
                    _ => debug!("Transport error after teardown: {}", error),
                }
            }
            Some(TransportEvent::Closed) | None => {
                self.attempt.transport_events = None;
                match self.state {
                    SessionState::Streaming => self.close_session(Some(SessionError::UnexpectedClose)),
                    SessionState::Handshaking => self.fail(TransportError::Closed.into()),
                    _ => debug!("Transport closed after teardown"),
                }
            }
        }
    }

    /// Streaming -> Closing -> Idle
    fn close_session(&mut self, reason: Option<SessionError>) {
        let status = match &reason {
            Some(error) => {
                warn!("Session ended: {}", error);
                error.status_text()
            }
            None => STATUS_IDLE.to_string(),
        };

        self.transition(SessionState::Closing, self.status_text.clone());
        self.abandon_attempt();
        self.transition(SessionState::Idle, status);
    }

    /// Enter the error state and schedule the return to idle
    fn fail(&mut self, error: SessionError) {
        error!("Error starting session: {}", error);
        self.abandon_attempt();
        self.transition(SessionState::Error, error.status_text());

        let delay = self.config.error_reset;
        self.spawn_completion(async move {
            tokio::time::sleep(delay).await;
            Completion::ErrorTimeout
        });
    }

    /// Release everything the live attempt holds and invalidate its pending work
    fn abandon_attempt(&mut self) {
        self.generation += 1;

        // Meter first: it must never read from a released tap
        self.meter.stop();

        let mut attempt = std::mem::take(&mut self.attempt);
        attempt.frames = None;

        if let Some(mut connection) = attempt.connection.take() {
            if attempt.started && connection.is_open() {
                connection.send(ControlMessage::EndSession.into());
            }
            connection.close();
        }
        attempt.transport_events = None;

        if let Some(mut capture) = attempt.capture.take() {
            capture.release();
        }

        if let Some(session) = attempt.session {
            debug!("Session {} torn down", session.id());
        }
        self.amplitude = 0.0;
    }

    fn spawn_completion<F>(&self, operation: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let generation = self.generation;
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let completion = operation.await;
            // If the controller is gone the completion drops here, releasing what it holds
            let _ = completions.send(Tagged {
                generation,
                completion,
            });
        });
    }

    fn transition(&mut self, state: SessionState, status: impl Into<String>) {
        if self.state != state {
            info!("Session state: {} -> {}", self.state, state);
        }
        self.state = state;
        self.status_text = status.into();
        self.publish();
    }

    fn publish(&mut self) {
        let update = SessionUpdate {
            state: self.state,
            status_text: self.status_text.clone(),
            amplitude: self.amplitude,
        };
        self.latest.send_replace(update.clone());
        let _ = self.updates.send(update);
    }
}

/// Drop the result of an operation that was cancelled while it was pending
fn discard_stale(completion: Completion) {
    match completion {
        Completion::CaptureAcquired(Ok(mut capture)) => {
            info!("Ignoring late capture grant, releasing it");
            capture.release();
        }
        Completion::TransportOpened {
            result: Ok(mut connection),
            ..
        } => {
            info!("Ignoring late connection, closing it");
            connection.close();
        }
        Completion::Negotiated(Ok(session_id)) => {
            info!("Ignoring late session {}", session_id);
        }
        _ => trace!("Discarding stale completion"),
    }
}

async fn next_transport_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_frame(frames: &mut Option<mpsc::Receiver<AudioFrame>>) -> Option<AudioFrame> {
    match frames {
        Some(frames) => frames.recv().await,
        None => std::future::pending().await,
    }
}
