//! Calls
//!
//! Two-party call sessions: the phase state machine, the room directory, the
//! signaling relay that drives both, and where finished calls are recorded.

mod directory;
mod error;
mod record;
mod relay;
mod session;
mod state;

pub use directory::{SessionDirectory, SharedSession};
pub use error::{SignalingError, SignalingResult};
pub use record::{CallRecord, CallRecordSink, ChannelSink, RedisSink, TracingSink};
pub use relay::{RelaySettings, SignalingRelay, PEER_DISCONNECTED};
pub use session::Session;
pub use state::{CallPhase, CallStateError, Party, PhaseEvent, Transition};
