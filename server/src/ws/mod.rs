//! WebSocket Control Channel
//!
//! One persistent connection per identity. The handshake token is validated
//! before upgrade; afterwards every text frame is a JSON [`ClientEvent`].

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use sb_common::protocol::{ClientEvent, ServerEvent};
use sb_common::Identity;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{api::AppState, auth::jwt, call::SignalingError, presence::ConnectionHandle};

/// WebSocket connection query params.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Handshake token issued by the auth service
    pub token: String,
}

/// WebSocket upgrade handler.
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    // Validate token before upgrade
    let identity = match jwt::validate_handshake_token(&query.token, &state.config.jwt_public_key)
    {
        Ok(identity) => identity,
        Err(e) => {
            debug!(error = %e, "Rejected control channel handshake");
            return e.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

/// Handle WebSocket connection.
async fn handle_socket(socket: WebSocket, state: AppState, identity: Identity) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let key = identity.key();

    // Channel for sending messages to the WebSocket
    let (tx, mut rx) = mpsc::channel::<ServerEvent>(state.config.outbound_queue_capacity);
    let handle = ConnectionHandle::new(tx.clone());
    let connection_id = handle.connection_id;

    // Ready goes out before any presence traffic
    let _ = tx
        .send(ServerEvent::Ready {
            identity: identity.clone(),
        })
        .await;
    state.relay.on_connect(identity.clone(), handle);

    info!(
        identity = %key,
        role = %identity.role,
        connection_id = %connection_id,
        "Control channel connected"
    );

    // Forward events to the WebSocket and keep pinging the peer
    let heartbeat_interval = state.config.heartbeat_interval;
    let sender_handle = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    let json = match serde_json::to_string(&event) {
                        Ok(json) => json,
                        Err(e) => {
                            error!(error = %e, "Failed to serialize event");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if ws_sender.send(Message::Ping(Default::default())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Handle incoming messages
    let heartbeat_timeout = state.config.heartbeat_timeout;
    loop {
        let msg = match tokio::time::timeout(heartbeat_timeout, ws_receiver.next()).await {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(e))) => {
                warn!(identity = %key, error = %e, "WebSocket error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                warn!(identity = %key, "Control channel silent past heartbeat timeout");
                break;
            }
        };

        state.relay.registry().touch(&key);

        match msg {
            Message::Text(text) => {
                handle_client_message(text.as_str(), &identity, &state, &tx).await;
            }
            Message::Binary(_) => {
                let _ = tx
                    .send(
                        SignalingError::Malformed(sb_common::Error::InvalidPayload(
                            "binary frames are not supported".into(),
                        ))
                        .to_event(),
                    )
                    .await;
            }
            Message::Close(_) => {
                debug!(identity = %key, "Close frame received");
                break;
            }
            // Pings are answered by axum; pongs only refresh liveness
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    // Cleanup
    sender_handle.abort();
    state.relay.on_disconnect(&identity, connection_id).await;

    info!(identity = %key, connection_id = %connection_id, "Control channel disconnected");
}

/// Decode and dispatch one text frame. Errors go back to this connection only.
async fn handle_client_message(
    text: &str,
    identity: &Identity,
    state: &AppState,
    tx: &mpsc::Sender<ServerEvent>,
) {
    let result = match ClientEvent::decode(text) {
        Ok(event) => state.relay.dispatch(identity, event).await,
        Err(e) => Err(SignalingError::from(e)),
    };

    match result {
        Ok(Some(reply)) => {
            let _ = tx.send(reply).await;
        }
        Ok(None) => {}
        Err(e) => {
            debug!(identity = %identity.key(), code = ?e.code(), error = %e, "Message refused");
            let _ = tx.send(e.to_event()).await;
        }
    }
}
