//! Call HTTP Handlers
//!
//! Polling and configuration endpoints. Call signaling itself is handled via
//! the WebSocket control channel.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use sb_common::protocol::OnlineEntry;
use sb_common::{IceServer, Role};
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::auth::AuthIdentity;

/// Response containing ICE server configuration.
#[derive(Debug, Serialize, Deserialize)]
pub struct IceServersResponse {
    /// List of ICE servers to use for WebRTC.
    pub ice_servers: Vec<IceServer>,
}

/// Get ICE server configuration.
///
/// GET /api/ice-servers
///
/// Returns STUN and TURN server configuration for media negotiation.
pub async fn get_ice_servers(
    State(state): State<AppState>,
    AuthIdentity(_): AuthIdentity,
) -> Json<IceServersResponse> {
    Json(IceServersResponse {
        ice_servers: state.config.ice_servers(),
    })
}

/// Presence query params.
#[derive(Debug, Default, Deserialize)]
pub struct PresenceQuery {
    /// Only list identities with this role
    pub role: Option<Role>,
}

/// Online identities in the caller's tenant.
#[derive(Debug, Serialize, Deserialize)]
pub struct PresenceResponse {
    pub entries: Vec<OnlineEntry>,
    /// When the registry was read. Clients can use it to age a polled list.
    pub taken_at: DateTime<Utc>,
}

/// List callable identities.
///
/// GET /api/presence?role=portal_customer
///
/// Snapshot only; clients poll.
pub async fn list_presence(
    State(state): State<AppState>,
    AuthIdentity(identity): AuthIdentity,
    Query(query): Query<PresenceQuery>,
) -> Json<PresenceResponse> {
    let (entries, taken_at) = state.relay.online_listing(&identity, query.role);
    Json(PresenceResponse { entries, taken_at })
}
