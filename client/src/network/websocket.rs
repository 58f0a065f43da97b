//! WebSocket Connection Manager
//!
//! Keeps the control channel open with keepalive pings and capped
//! reconnection, and surfaces inbound events on a channel.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use sb_common::protocol::{ClientEvent, ServerEvent};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection task has stopped")]
    Closed,
}

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Connection settings.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// `http(s)://` or `ws(s)://` base URL of the server.
    pub server_url: String,
    /// Handshake token issued by the auth service.
    pub token: String,
    /// Consecutive failed attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first retry; doubles per attempt.
    pub reconnect_delay: Duration,
    pub max_backoff: Duration,
    /// Interval between protocol `ping`s.
    pub keepalive_interval: Duration,
}

impl ConnectionConfig {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            token: token.into(),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(15),
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(5));
        std::cmp::min(self.reconnect_delay.saturating_mul(factor), self.max_backoff)
    }

    fn ws_url(&self) -> String {
        let base = self
            .server_url
            .replace("http://", "ws://")
            .replace("https://", "wss://");
        format!("{}/ws?token={}", base.trim_end_matches('/'), self.token)
    }
}

/// Handle to the control channel.
pub struct SignalingConnection {
    /// Channel to send events to the WebSocket.
    tx: mpsc::Sender<ClientEvent>,
    status: Arc<RwLock<ConnectionStatus>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl SignalingConnection {
    /// Start the connection task.
    ///
    /// The returned receiver yields every inbound event and closes once the
    /// task gives up or is shut down.
    pub fn connect(config: ConnectionConfig) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (event_tx, event_rx) = mpsc::channel::<ClientEvent>(100);
        let (inbound_tx, inbound_rx) = mpsc::channel::<ServerEvent>(100);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let status = Arc::new(RwLock::new(ConnectionStatus::Connecting));

        let status_clone = status.clone();
        tokio::spawn(async move {
            connection_loop(config, event_rx, inbound_tx, shutdown_rx, status_clone).await;
        });

        (
            Self {
                tx: event_tx,
                status,
                shutdown_tx: Some(shutdown_tx),
            },
            inbound_rx,
        )
    }

    /// Send an event to the server.
    pub async fn send(&self, event: ClientEvent) -> Result<(), ConnectionError> {
        self.tx.send(event).await.map_err(|_| ConnectionError::Closed)
    }

    /// A cloneable sender for components that signal on their own.
    pub fn sender(&self) -> mpsc::Sender<ClientEvent> {
        self.tx.clone()
    }

    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    /// Close the socket and stop reconnecting.
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

/// Main connection loop with reconnection logic.
async fn connection_loop(
    config: ConnectionConfig,
    mut event_rx: mpsc::Receiver<ClientEvent>,
    inbound_tx: mpsc::Sender<ServerEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
    status: Arc<RwLock<ConnectionStatus>>,
) {
    let ws_url = config.ws_url();
    let mut attempt = 0u32;

    loop {
        *status.write().await = if attempt > 0 {
            ConnectionStatus::Reconnecting { attempt }
        } else {
            ConnectionStatus::Connecting
        };

        match connect_async(&ws_url).await {
            Ok((ws_stream, _)) => {
                info!(server = %config.server_url, "Control channel connected");
                attempt = 0;
                *status.write().await = ConnectionStatus::Connected;

                let (mut write, mut read) = ws_stream.split();
                let mut keepalive = tokio::time::interval(config.keepalive_interval);
                keepalive.tick().await;

                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    match ServerEvent::decode(text.as_str()) {
                                        Ok(event) => {
                                            debug!(?event, "Received");
                                            if inbound_tx.send(event).await.is_err() {
                                                info!("Inbound receiver dropped");
                                                let _ = write.send(Message::Close(None)).await;
                                                *status.write().await = ConnectionStatus::Disconnected;
                                                return;
                                            }
                                        }
                                        Err(e) => warn!(error = %e, "Failed to parse server message"),
                                    }
                                }
                                Some(Ok(Message::Close(_))) => {
                                    info!("Server closed connection");
                                    break;
                                }
                                Some(Err(e)) => {
                                    error!(error = %e, "WebSocket error");
                                    break;
                                }
                                None => {
                                    info!("WebSocket stream ended");
                                    break;
                                }
                                // Pings are answered by tungstenite
                                Some(Ok(_)) => {}
                            }
                        }

                        event = event_rx.recv() => {
                            let Some(event) = event else {
                                info!("Event channel closed");
                                let _ = write.send(Message::Close(None)).await;
                                *status.write().await = ConnectionStatus::Disconnected;
                                return;
                            };
                            match serde_json::to_string(&event) {
                                Ok(json) => {
                                    if let Err(e) = write.send(Message::Text(json.into())).await {
                                        error!(error = %e, "Failed to send message");
                                        break;
                                    }
                                }
                                Err(e) => error!(error = %e, "Failed to serialize event"),
                            }
                        }

                        _ = keepalive.tick() => {
                            if let Ok(json) = serde_json::to_string(&ClientEvent::Ping) {
                                if let Err(e) = write.send(Message::Text(json.into())).await {
                                    error!(error = %e, "Failed to send keepalive");
                                    break;
                                }
                            }
                        }

                        _ = shutdown_rx.recv() => {
                            info!("Shutdown received during connection");
                            let _ = write.send(Message::Close(None)).await;
                            *status.write().await = ConnectionStatus::Disconnected;
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to connect");
            }
        }

        *status.write().await = ConnectionStatus::Disconnected;

        attempt += 1;
        if attempt > config.max_reconnect_attempts {
            warn!(attempts = attempt - 1, "Giving up on control channel");
            return;
        }
        let backoff = config.backoff(attempt);
        info!(?backoff, attempt, "Reconnecting");

        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.recv() => {
                info!("Shutdown during reconnect backoff");
                return;
            }
        }
    }
}
