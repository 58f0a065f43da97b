//! Media Engine
//!
//! The seam between negotiation and the actual peer connection. The
//! coordinator only ever talks to a [`MediaEngine`]; [`WebRtcEngine`] is the
//! webrtc-rs implementation.

mod webrtc_engine;

use async_trait::async_trait;
use sb_common::IceCandidate;
use thiserror::Error;

pub use self::webrtc_engine::WebRtcEngine;

/// Media engine errors
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("WebRTC API error: {0}")]
    Api(String),
    #[error("Peer connection error: {0}")]
    PeerConnection(String),
    #[error("SDP error: {0}")]
    Sdp(String),
    #[error("ICE error: {0}")]
    Ice(String),
    #[error("Track error: {0}")]
    Track(String),
    #[error("Peer connection closed")]
    Closed,
}

/// Connection state as reported by the engine.
///
/// Informational only: the relay's session phase is authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

/// Signals raised by the engine outside of a request/response call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A local candidate was gathered and should be trickled to the peer.
    LocalCandidate(IceCandidate),
    /// The underlying peer connection changed state.
    StateChanged(MediaConnectionState),
}

/// Offer/answer/ICE operations on one peer connection.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Create an offer and install it as the local description.
    async fn create_offer(&self) -> Result<String, MediaError>;

    /// Install the peer's offer as the remote description.
    async fn apply_remote_offer(&self, sdp: &str) -> Result<(), MediaError>;

    /// Create an answer to the installed remote offer and install it locally.
    async fn create_answer(&self) -> Result<String, MediaError>;

    /// Install the peer's answer as the remote description.
    async fn apply_remote_answer(&self, sdp: &str) -> Result<(), MediaError>;

    /// Add a remote candidate. Only valid once a remote description is set.
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    /// Stop (or resume) sending local audio.
    fn set_muted(&self, muted: bool);

    /// Tear down the peer connection.
    async fn close(&self) -> Result<(), MediaError>;
}
