//! Reusable test helpers for integration tests.
//!
//! Provides `TestApp` for building and sending requests through the full axum
//! router, a real listener for control-channel tests, and a small WebSocket
//! client that speaks the signaling protocol.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{self, Method, Request, Response};
use axum::Router;
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use sb_common::protocol::{ClientEvent, ServerEvent};
use sb_common::{Identity, Role};
use sb_server::api::{create_router, AppState};
use sb_server::auth::jwt;
use sb_server::call::{CallRecord, ChannelSink};
use sb_server::config::Config;
use sb_server::presence::PresenceRegistry;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;
use uuid::Uuid;

/// How long a test waits for an expected event.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(3);

// ============================================================================
// Test App
// ============================================================================

/// A test application wrapping the full axum router.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub config: Arc<Config>,
    /// Every call record the relay emits.
    pub records: mpsc::UnboundedReceiver<CallRecord>,
}

impl TestApp {
    /// Create a new test app with the test config.
    pub fn new() -> Self {
        Self::with_config(Config::default_for_test())
    }

    /// Create a test app with a custom config (for timer testing).
    pub fn with_config(config: Config) -> Self {
        let (sink, records) = ChannelSink::new();
        let state = AppState::new(config.clone(), PresenceRegistry::in_memory(), Arc::new(sink));
        let router = create_router(state.clone());

        Self {
            router,
            state,
            config: Arc::new(config),
            records,
        }
    }

    /// Build an HTTP request with the given method and URI.
    pub fn request(method: Method, uri: &str) -> http::request::Builder {
        Request::builder().method(method).uri(uri)
    }

    /// Send a request through the router without a listener.
    pub async fn oneshot(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot request failed")
    }

    /// Next call record, failing the test if none arrives in time.
    pub async fn next_record(&mut self) -> CallRecord {
        tokio::time::timeout(EVENT_TIMEOUT, self.records.recv())
            .await
            .expect("Timed out waiting for call record")
            .expect("Record channel closed")
    }
}

// ============================================================================
// Test Server
// ============================================================================

/// A running server bound to an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub url: String,
    _handle: JoinHandle<()>,
}

impl TestServer {
    /// Control-channel URL for `token`.
    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/ws?token={token}", self.addr)
    }
}

/// Spawn the router on a real listener.
pub async fn spawn_test_server(router: Router) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Failed to get local addr");
    let url = format!("http://{addr}");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .await
            .expect("Test server failed");
    });

    TestServer {
        addr,
        url,
        _handle: handle,
    }
}

// ============================================================================
// Identity & Auth helpers
// ============================================================================

/// A fresh identity in `tenant_id`.
pub fn identity(tenant_id: Uuid, role: Role, name: &str) -> Identity {
    Identity {
        id: Uuid::now_v7(),
        tenant_id,
        role,
        display_name: name.to_string(),
    }
}

/// Handshake token for `identity`, signed with the test key.
pub fn token_for(identity: &Identity) -> String {
    jwt::sign_handshake_token(identity, jwt::TEST_PRIVATE_KEY, 300)
        .expect("Failed to sign test token")
}

/// Parse a response body as JSON.
pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("Failed to collect response body")
        .to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|e| {
        let preview = String::from_utf8_lossy(&bytes);
        panic!("Failed to parse response as JSON: {e}\nBody: {preview}")
    })
}

// ============================================================================
// Control-channel client
// ============================================================================

/// A participant connected to the control channel.
pub struct WsClient {
    pub identity: Identity,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Connect and wait for the `ready` handshake ack.
    pub async fn connect(server: &TestServer, identity: Identity) -> Self {
        let (stream, _) = connect_async(server.ws_url(&token_for(&identity)))
            .await
            .expect("WebSocket connect failed");
        let mut client = Self { identity, stream };

        match client.recv().await {
            ServerEvent::Ready { identity } => assert_eq!(identity, client.identity),
            other => panic!("Expected ready, got {other:?}"),
        }
        client
    }

    /// Send a protocol event.
    pub async fn send(&mut self, event: &ClientEvent) {
        let json = serde_json::to_string(event).expect("Failed to serialize event");
        self.send_raw(&json).await;
    }

    /// Send an arbitrary text frame.
    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(Message::Text(text.to_string().into()))
            .await
            .expect("WebSocket send failed");
    }

    /// Next event of any kind, presence updates included.
    pub async fn recv_any(&mut self) -> ServerEvent {
        loop {
            let frame = tokio::time::timeout(EVENT_TIMEOUT, self.stream.next())
                .await
                .expect("Timed out waiting for event")
                .expect("WebSocket closed")
                .expect("WebSocket error");

            if let Message::Text(text) = frame {
                return ServerEvent::decode(text.as_str()).expect("Undecodable server event");
            }
        }
    }

    /// Next call-related event, skipping presence broadcasts.
    pub async fn recv(&mut self) -> ServerEvent {
        loop {
            match self.recv_any().await {
                ServerEvent::PresenceUpdate { .. } => continue,
                other => return other,
            }
        }
    }

    /// Assert no call-related event arrives within `window`.
    pub async fn expect_silence(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.stream.next()).await {
                Err(_) => return,
                Ok(None | Some(Err(_))) => return,
                Ok(Some(Ok(Message::Text(text)))) => {
                    match ServerEvent::decode(text.as_str()).expect("Undecodable server event") {
                        ServerEvent::PresenceUpdate { .. } => {}
                        other => panic!("Expected silence, got {other:?}"),
                    }
                }
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    /// Drop the TCP connection without a close frame.
    pub fn drop_abruptly(self) {
        drop(self.stream);
    }
}
