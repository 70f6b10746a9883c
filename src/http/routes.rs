use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the mock backend router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session negotiation
        .route("/api/realtime-session", post(handlers::create_session))
        .route("/api/sessions/:session_id", get(handlers::get_session))
        // Streaming channel
        .route("/", get(handlers::stream_socket))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
