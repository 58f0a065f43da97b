//! API Router and Application State
//!
//! Central routing configuration and shared state.

mod calls;

use std::sync::Arc;

use axum::{extract::State, middleware::from_fn_with_state, routing::get, Json, Router};
use serde::Serialize;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::{
    auth,
    call::{CallRecordSink, RelaySettings, SignalingRelay},
    config::Config,
    presence::PresenceRegistry,
    ws,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Signaling relay (owns the presence registry and session directory)
    pub relay: SignalingRelay,
}

impl AppState {
    /// Create new application state.
    #[must_use]
    pub fn new(config: Config, registry: PresenceRegistry, sink: Arc<dyn CallRecordSink>) -> Self {
        let relay = SignalingRelay::new(registry, sink, RelaySettings::from(&config));
        Self {
            config: Arc::new(config),
            relay,
        }
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Protected routes that require a handshake token
    let protected_routes = Router::new()
        .route("/api/presence", get(calls::list_presence))
        .route("/api/ice-servers", get(calls::get_ice_servers))
        .layer(from_fn_with_state(state.clone(), auth::require_auth));

    Router::new()
        // Health check
        .route("/health", get(health_check))
        .merge(protected_routes)
        // WebSocket
        .route("/ws", get(ws::handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // State
        .with_state(state)
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    /// Service status
    status: &'static str,
    /// Sessions currently held, including recently finished ones
    sessions: usize,
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.relay.directory().len(),
    })
}
