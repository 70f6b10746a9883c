//! Mock speech backend for local development
//!
//! Implements both ends the client talks to:
//! - POST /api/realtime-session - Negotiate a session id
//! - GET /api/sessions/:id - Inspect what a session received
//! - GET / (WebSocket upgrade) - Streaming channel
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, MockSession};

use anyhow::{Context, Result};
use tracing::info;

/// Bind and serve the mock backend until the task is cancelled
pub async fn serve(bind: &str, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;

    info!("Mock backend listening on {}", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .await
        .context("Mock backend stopped")
}
