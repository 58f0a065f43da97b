//! Switchboard Client
//!
//! Control-channel connection manager and the per-call media negotiation
//! coordinator. Rendering and device capture belong to the embedding app.

pub mod media;
pub mod negotiation;
pub mod network;

pub use media::{EngineEvent, MediaConnectionState, MediaEngine, MediaError, WebRtcEngine};
pub use negotiation::{
    CoordinatorCommand, CoordinatorError, CoordinatorEvent, NegotiationCoordinator,
    NegotiationRole, PendingIceQueue,
};
pub use network::{ConnectionConfig, ConnectionError, ConnectionStatus, SignalingConnection};
