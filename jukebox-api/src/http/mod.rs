// Module: http
// Router, shared state and handlers

pub mod error;
pub mod health;
pub mod identity;
pub mod stream;
pub mod websocket;

use std::sync::Arc;

use axum::{http::HeaderValue, routing::get, Router};
use jukebox_core::service::Orchestrator;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub use error::{AppError, AppResult};
pub use identity::{GuestIdentity, IdentityResolver, SessionIdentity};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub identity: Arc<dyn IdentityResolver>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, identity: Arc<dyn IdentityResolver>) -> Self {
        Self {
            orchestrator,
            identity,
        }
    }
}

/// `*` or empty allows any origin.
fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin.is_empty() || origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(e) => {
            warn!("Invalid CORS origin '{}' ({}), allowing any", origin, e);
            layer.allow_origin(Any)
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(state: AppState, cors_origin: &str) -> Router {
    Router::new()
        .merge(health::create_health_router())
        .route("/ws", get(websocket::websocket_handler))
        .route("/stream/{video_ref}/{file}", get(stream::stream_file))
        .layer(cors_layer(cors_origin))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
