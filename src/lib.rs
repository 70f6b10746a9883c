pub mod audio;
pub mod config;
pub mod error;
pub mod handshake;
pub mod http;
pub mod session;
pub mod transport;

pub use audio::{
    AnalysisTap, AudioCapture, AudioFile, AudioFrame, AudioSource, CaptureConfig, CaptureFactory,
    CaptureHandle, FileCapture, FrameSink, LevelMeter, MeterConfig,
};
pub use config::ClientConfig;
pub use error::{CaptureError, HandshakeError, SessionError, TransportError};
pub use handshake::{HandshakeClient, HttpHandshake};
pub use http::{create_router, AppState};
pub use session::{
    SessionComponents, SessionConfig, SessionController, SessionMode, SessionState, SessionStats,
    SessionUpdate, Trigger,
};
pub use transport::{
    Connection, ControlMessage, Outbound, StreamTransport, TransportEvent, WebSocketTransport,
};
