//! Server Configuration
//!
//! Loads configuration from environment variables.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use sb_common::IceServer;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (e.g., "0.0.0.0:8080")
    pub bind_address: String,

    /// Ed25519 public key (PEM, base64-encoded) used to verify handshake tokens
    pub jwt_public_key: String,

    /// How long a call may ring before it is marked missed (default: 45s)
    pub ring_timeout: Duration,

    /// Interval between server-sent WebSocket pings (default: 15s)
    pub heartbeat_interval: Duration,

    /// Silence after which a control channel is considered dead (default: 45s)
    pub heartbeat_timeout: Duration,

    /// How long a finished session stays queryable for late duplicates (default: 5s)
    pub session_retention: Duration,

    /// Per-connection outbound event queue depth (default: 100)
    pub outbound_queue_capacity: usize,

    /// Redis URL for publishing call records (optional)
    pub redis_url: Option<String>,

    /// Redis pub/sub channel that receives call records
    pub call_record_channel: String,

    /// WebRTC STUN server
    pub stun_server: String,

    /// WebRTC TURN server (optional)
    pub turn_server: Option<String>,

    /// WebRTC TURN username (optional)
    pub turn_username: Option<String>,

    /// WebRTC TURN credential (optional)
    pub turn_credential: Option<String>,
}

fn secs_from_env(name: &str, default: u64) -> Duration {
    Duration::from_secs(
        env::var(name)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            jwt_public_key: env::var("JWT_PUBLIC_KEY").context("JWT_PUBLIC_KEY must be set")?,
            ring_timeout: secs_from_env("RING_TIMEOUT_SECS", 45),
            heartbeat_interval: secs_from_env("HEARTBEAT_INTERVAL_SECS", 15),
            heartbeat_timeout: secs_from_env("HEARTBEAT_TIMEOUT_SECS", 45),
            session_retention: secs_from_env("SESSION_RETENTION_SECS", 5),
            outbound_queue_capacity: env::var("OUTBOUND_QUEUE_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n: &usize| n > 0)
                .unwrap_or(100),
            redis_url: env::var("REDIS_URL").ok(),
            call_record_channel: env::var("CALL_RECORD_CHANNEL")
                .unwrap_or_else(|_| "call_records".into()),
            stun_server: env::var("STUN_SERVER")
                .unwrap_or_else(|_| "stun:stun.l.google.com:19302".into()),
            turn_server: env::var("TURN_SERVER").ok(),
            turn_username: env::var("TURN_USERNAME").ok(),
            turn_credential: env::var("TURN_CREDENTIAL").ok(),
        })
    }

    /// Check if TURN is configured.
    #[must_use]
    pub const fn has_turn(&self) -> bool {
        self.turn_server.is_some()
    }

    /// ICE servers advertised to media negotiation coordinators.
    #[must_use]
    pub fn ice_servers(&self) -> Vec<IceServer> {
        let mut servers = vec![IceServer {
            urls: vec![self.stun_server.clone()],
            username: None,
            credential: None,
        }];

        if let Some(turn) = &self.turn_server {
            servers.push(IceServer {
                urls: vec![turn.clone()],
                username: self.turn_username.clone(),
                credential: self.turn_credential.clone(),
            });
        }

        servers
    }

    /// Create a default configuration for testing.
    ///
    /// Timers are shortened so ring timeouts and heartbeats fire within a test run.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            bind_address: "127.0.0.1:0".into(),
            jwt_public_key: crate::auth::jwt::TEST_PUBLIC_KEY.into(),
            ring_timeout: Duration::from_millis(300),
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(5),
            session_retention: Duration::from_millis(500),
            outbound_queue_capacity: 100,
            redis_url: None,
            call_record_channel: "call_records".into(),
            stun_server: "stun:stun.l.google.com:19302".into(),
            turn_server: None,
            turn_username: None,
            turn_credential: None,
        }
    }
}
