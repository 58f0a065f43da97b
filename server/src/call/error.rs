//! Signaling Errors

use sb_common::protocol::{ErrorCode, ServerEvent};
use sb_common::RoomId;
use thiserror::Error;

use super::state::CallStateError;

/// Errors reported back to the connection whose message caused them.
///
/// None of these affect the session or any other connection.
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Callee has no open control channel.
    #[error("Callee unavailable")]
    Unavailable,

    /// Caller or callee already has a call in progress.
    #[error("Busy")]
    Busy,

    /// Caller targeted itself.
    #[error("Cannot call yourself")]
    SelfCall,

    /// Callee belongs to a different tenant.
    #[error("Callee is in another tenant")]
    CrossTenant,

    /// Sender is not one of the room's participants.
    #[error("Not a participant in room {0}")]
    NotAParticipant(RoomId),

    /// Room phase does not permit the message.
    #[error("Illegal transition in room {room_id}: {source}")]
    IllegalTransition {
        room_id: RoomId,
        #[source]
        source: CallStateError,
    },

    /// No such room.
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// Frame could not be decoded or carried an empty payload.
    #[error("Malformed message: {0}")]
    Malformed(#[from] sb_common::Error),
}

impl SignalingError {
    /// Wire error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Unavailable => ErrorCode::Unavailable,
            Self::Busy => ErrorCode::Busy,
            Self::SelfCall => ErrorCode::SelfCall,
            Self::CrossTenant => ErrorCode::CrossTenant,
            Self::NotAParticipant(_) => ErrorCode::NotAParticipant,
            Self::IllegalTransition { .. } => ErrorCode::IllegalTransition,
            Self::RoomNotFound(_) => ErrorCode::RoomNotFound,
            Self::Malformed(_) => ErrorCode::Malformed,
        }
    }

    /// Room the error refers to, if any.
    #[must_use]
    pub const fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::NotAParticipant(room_id)
            | Self::IllegalTransition { room_id, .. }
            | Self::RoomNotFound(room_id) => Some(*room_id),
            Self::Unavailable
            | Self::Busy
            | Self::SelfCall
            | Self::CrossTenant
            | Self::Malformed(_) => None,
        }
    }

    /// Error frame for the originating connection.
    #[must_use]
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.code(),
            message: self.to_string(),
            room_id: self.room_id(),
        }
    }
}

/// Result type for relay operations.
pub type SignalingResult<T> = Result<T, SignalingError>;
