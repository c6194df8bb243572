//! parley-api - HTTP and WebSocket server for parley

pub mod config;
pub mod error;
pub mod handlers;
pub mod services;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::ApiConfig;
pub use error::ApiError;
pub use state::{AppState, Backends};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/ws", get(handlers::ws_handler))
        .route(
            "/api/v1/conversations/:id/messages",
            post(handlers::post_message),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
