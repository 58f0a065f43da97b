//! Control-Channel Protocol
//!
//! JSON text frames, internally tagged by `type`. Every frame a client sends
//! is a [`ClientEvent`]; every frame the server sends is a [`ServerEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Identity, IdentityKey, IceCandidate, PresenceStatus, RoomId, Role};

/// Client-to-server events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Keepalive; refreshes `last_seen_at`.
    Ping,
    /// Start a call to `target`.
    CallRequest { target: IdentityKey },
    /// Callee picks up.
    Accept { room_id: RoomId },
    /// Callee declines.
    Reject {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Either side hangs up.
    End {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Media offer, relayed verbatim.
    Offer { room_id: RoomId, sdp: String },
    /// Media answer, relayed verbatim.
    Answer { room_id: RoomId, sdp: String },
    /// Trickled ICE candidate, relayed verbatim.
    IceCandidate {
        room_id: RoomId,
        candidate: IceCandidate,
    },
    /// The sender's media engine reports the peer connection is up.
    Connected { room_id: RoomId },
    /// Snapshot of callable identities in the sender's tenant.
    ListOnline {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },
}

impl ClientEvent {
    /// Room the event refers to, if any.
    #[must_use]
    pub const fn room_id(&self) -> Option<RoomId> {
        match self {
            Self::Accept { room_id }
            | Self::Reject { room_id, .. }
            | Self::End { room_id, .. }
            | Self::Offer { room_id, .. }
            | Self::Answer { room_id, .. }
            | Self::IceCandidate { room_id, .. }
            | Self::Connected { room_id } => Some(*room_id),
            Self::Ping | Self::CallRequest { .. } | Self::ListOnline { .. } => None,
        }
    }

    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Structural well-formedness of the payload. Contents are never inspected.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Offer { sdp, .. } | Self::Answer { sdp, .. } if sdp.trim().is_empty() => {
                Err(Error::InvalidPayload("empty session description".into()))
            }
            Self::IceCandidate { candidate, .. } if !candidate.is_well_formed() => {
                Err(Error::InvalidPayload("empty ICE candidate".into()))
            }
            _ => Ok(()),
        }
    }
}

/// One row of an `online_list` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineEntry {
    pub identity: Identity,
    pub status: PresenceStatus,
    pub last_seen_at: DateTime<Utc>,
}

/// Machine-readable error codes carried by [`ServerEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Callee has no open control channel.
    Unavailable,
    /// Callee (or caller) is already in a call.
    Busy,
    /// Caller targeted itself.
    SelfCall,
    /// Target lives in a different tenant.
    CrossTenant,
    /// Sender is not one of the room's two participants.
    NotAParticipant,
    /// The room's phase does not permit the message.
    IllegalTransition,
    /// No such room.
    RoomNotFound,
    /// Frame could not be decoded or carried an empty payload.
    Malformed,
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake accepted.
    Ready { identity: Identity },
    /// Reply to [`ClientEvent::Ping`].
    Pong,
    /// To the caller: the callee is being rung.
    CallRinging { room_id: RoomId, callee: Identity },
    /// To the callee: someone is calling.
    IncomingCall { room_id: RoomId, caller: Identity },
    /// To the caller: the callee picked up. Caller starts negotiation.
    Accepted { room_id: RoomId },
    /// To the caller: the callee declined.
    Rejected {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// To both: nobody answered in time.
    Missed { room_id: RoomId },
    /// To the remaining party: the call is over.
    Ended { room_id: RoomId, reason: String },
    /// Relayed media offer.
    Offer { room_id: RoomId, sdp: String },
    /// Relayed media answer.
    Answer { room_id: RoomId, sdp: String },
    /// Relayed ICE candidate.
    IceCandidate {
        room_id: RoomId,
        candidate: IceCandidate,
    },
    /// Reply to [`ClientEvent::ListOnline`].
    OnlineList { entries: Vec<OnlineEntry> },
    /// Someone in the tenant connected, disconnected, or changed availability.
    PresenceUpdate {
        identity: IdentityKey,
        status: PresenceStatus,
    },
    /// A message from this connection was refused.
    Error {
        code: ErrorCode,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
}

impl ServerEvent {
    /// Decode a text frame.
    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_client_event_wire_format() {
        let room_id = RoomId::generate();
        let json = serde_json::to_string(&ClientEvent::Offer {
            room_id,
            sdp: "v=0".to_string(),
        })
        .unwrap();
        assert!(json.contains("\"type\":\"offer\""));
        assert!(json.contains("\"sdp\":\"v=0\""));
    }

    #[test]
    fn test_call_request_deserialization() {
        let tenant = Uuid::new_v4();
        let id = Uuid::new_v4();
        let json = format!(
            r#"{{"type":"call_request","target":{{"tenant_id":"{tenant}","id":"{id}"}}}}"#
        );
        let event: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(
            event,
            ClientEvent::CallRequest {
                target: IdentityKey::new(tenant, id)
            }
        );
    }

    #[test]
    fn test_reject_reason_is_optional() {
        let room_id = RoomId::generate();
        let json = format!(r#"{{"type":"reject","room_id":"{room_id}"}}"#);
        let event: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(
            event,
            ClientEvent::Reject {
                room_id,
                reason: None
            }
        );
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"transfer"}"#).is_err());
    }

    #[test]
    fn test_empty_sdp_fails_validation() {
        let event = ClientEvent::Answer {
            room_id: RoomId::generate(),
            sdp: String::new(),
        };
        assert!(matches!(event.validate(), Err(Error::InvalidPayload(_))));
        assert!(ClientEvent::Ping.validate().is_ok());
    }

    #[test]
    fn test_decode_reports_malformed() {
        assert!(matches!(
            ClientEvent::decode("{not json"),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn test_room_id_accessor() {
        let room_id = RoomId::generate();
        assert_eq!(ClientEvent::Accept { room_id }.room_id(), Some(room_id));
        assert_eq!(ClientEvent::Ping.room_id(), None);
    }

    #[test]
    fn test_error_event_serialization() {
        let json = serde_json::to_string(&ServerEvent::Error {
            code: ErrorCode::NotAParticipant,
            message: "not a participant".to_string(),
            room_id: None,
        })
        .unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"code\":\"not_a_participant\""));
        assert!(!json.contains("room_id"));
    }
}
