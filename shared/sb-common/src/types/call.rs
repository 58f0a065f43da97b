//! Call Types

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique, immutable identifier of one call attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub Uuid);

impl RoomId {
    /// Allocate a fresh, time-ordered room ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Call availability of a connected identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Connected and able to take a call.
    #[default]
    Online,
    /// Connected but in a call.
    Busy,
    /// No open control channel. Only ever seen in `presence_update` broadcasts.
    Offline,
}

/// How a call attempt finished, as reported to the call record sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// A participant hung up after the call was accepted.
    Ended,
    /// The callee declined.
    Rejected,
    /// Nobody answered before the ring timeout.
    Missed,
    /// The caller hung up while the callee was still ringing.
    Cancelled,
    /// A participant's transport dropped mid-call.
    Failed,
}

/// A trickled ICE candidate, in the shape media engines exchange them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The `candidate:` attribute line.
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    /// Structural check only; the relay never interprets candidate contents.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        !self.candidate.trim().is_empty()
    }
}

/// STUN/TURN server handed to media engines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs (e.g., "stun:stun.l.google.com:19302")
    pub urls: Vec<String>,
    /// Username for TURN servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Credential for TURN servers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Public Google STUN servers.
    #[must_use]
    pub fn default_stun() -> Vec<Self> {
        [
            "stun:stun.l.google.com:19302",
            "stun:stun1.l.google.com:19302",
            "stun:stun2.l.google.com:19302",
        ]
        .into_iter()
        .map(|url| Self {
            urls: vec![url.to_string()],
            username: None,
            credential: None,
        })
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_id_is_transparent() {
        let room = RoomId::generate();
        let json = serde_json::to_string(&room).unwrap();
        assert_eq!(json, format!("\"{}\"", room.0));
    }

    #[test]
    fn test_presence_status_defaults_online() {
        assert_eq!(PresenceStatus::default(), PresenceStatus::Online);
        assert_eq!(serde_json::to_string(&PresenceStatus::Busy).unwrap(), "\"busy\"");
    }

    #[test]
    fn test_room_ids_are_unique() {
        assert_ne!(RoomId::generate(), RoomId::generate());
    }

    #[test]
    fn test_ice_candidate_optional_fields_skipped() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 50000 typ host".to_string(),
            sdp_mid: None,
            sdp_m_line_index: Some(0),
            username_fragment: None,
        };
        let json = serde_json::to_string(&candidate).unwrap();
        assert!(json.contains("\"sdp_m_line_index\":0"));
        assert!(!json.contains("sdp_mid"));
    }

    #[test]
    fn test_blank_candidate_is_malformed() {
        let candidate = IceCandidate {
            candidate: "   ".to_string(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        };
        assert!(!candidate.is_well_formed());
    }

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(
            serde_json::to_string(&CallOutcome::Missed).unwrap(),
            "\"missed\""
        );
        assert_eq!(
            serde_json::to_string(&PresenceStatus::Busy).unwrap(),
            "\"busy\""
        );
    }
}
