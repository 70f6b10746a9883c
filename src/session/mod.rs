//! Realtime audio session lifecycle
//!
//! This module provides the `SessionController`, the single object the
//! presentation layer talks to. It sequences:
//! - Microphone acquisition
//! - Session negotiation with the backend
//! - Streaming audio frames over the persistent channel
//! - Level metering for the UI
//! - Teardown on stop, failure or connection loss

mod config;
mod controller;
mod state;
mod stats;

pub use config::{SessionConfig, SessionMode};
pub use controller::{SessionComponents, SessionController, Trigger};
pub use state::{
    Session, SessionState, SessionUpdate, STATUS_CONNECTING, STATUS_IDLE, STATUS_LISTENING,
    STATUS_SPEAK_NOW,
};
pub use stats::SessionStats;
