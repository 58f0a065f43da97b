//! Call Phase State Machine
//!
//! Pure transition rules for a two-party call. The relay feeds every control
//! message (and its own timer/disconnect signals) through [`CallPhase::apply`]
//! while holding the room lock, then acts on the returned [`Transition`].

use sb_common::CallOutcome;
use serde::{Deserialize, Serialize};

/// Position of a session in the call lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Requested,
    Ringing,
    Accepted,
    Connecting,
    Active,
    Ended,
    Rejected,
    Missed,
    /// Caller hung up before the callee answered.
    Cancelled,
    Failed,
}

impl CallPhase {
    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Ended | Self::Rejected | Self::Missed | Self::Cancelled | Self::Failed
        )
    }

    /// Outcome reported to the call record sink, for terminal phases.
    #[must_use]
    pub const fn outcome(self) -> Option<CallOutcome> {
        match self {
            Self::Ended => Some(CallOutcome::Ended),
            Self::Rejected => Some(CallOutcome::Rejected),
            Self::Missed => Some(CallOutcome::Missed),
            Self::Cancelled => Some(CallOutcome::Cancelled),
            Self::Failed => Some(CallOutcome::Failed),
            Self::Requested | Self::Ringing | Self::Accepted | Self::Connecting | Self::Active => {
                None
            }
        }
    }
}

/// Which side of the call sent a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Caller,
    Callee,
}

impl Party {
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Caller => Self::Callee,
            Self::Callee => Self::Caller,
        }
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Callee has been notified.
    Ring,
    Accept(Party),
    Reject(Party),
    /// Ring window elapsed.
    Timeout,
    Offer,
    Answer,
    IceCandidate,
    /// A participant's media engine reports connectivity.
    Connected,
    End(Party),
    /// A participant's control channel went away.
    Disconnect,
}

/// What applying an event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Moved to a new phase.
    Advance(CallPhase),
    /// Legal, phase unchanged. The message is relayed.
    Stay,
    /// Duplicate or lost race. Dropped without relay or error.
    Ignore,
}

/// Rejected transitions.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CallStateError {
    #[error("{event:?} not allowed while {phase:?}")]
    InvalidTransition { phase: CallPhase, event: PhaseEvent },
}

impl CallPhase {
    /// Apply an event to derive the next phase.
    pub fn apply(self, event: PhaseEvent) -> Result<Transition, CallStateError> {
        use CallPhase as P;
        use PhaseEvent as E;
        use Transition::{Advance, Ignore, Stay};

        // Terminal phases absorb everything; late duplicates are expected.
        if self.is_terminal() {
            return Ok(Ignore);
        }

        match (self, event) {
            (P::Requested, E::Ring) => Ok(Advance(P::Ringing)),

            // Only the callee answers
            (P::Ringing, E::Accept(Party::Callee)) => Ok(Advance(P::Accepted)),
            (P::Accepted | P::Connecting | P::Active, E::Accept(Party::Callee)) => Ok(Ignore),

            (P::Ringing, E::Reject(Party::Callee) | E::End(Party::Callee)) => {
                Ok(Advance(P::Rejected))
            }
            (P::Ringing, E::Reject(Party::Caller) | E::End(Party::Caller)) => {
                Ok(Advance(P::Cancelled))
            }
            (P::Accepted | P::Connecting | P::Active, E::Reject(_)) => Ok(Ignore),

            (P::Ringing, E::Timeout) => Ok(Advance(P::Missed)),
            (_, E::Timeout) => Ok(Ignore),

            (P::Accepted, E::Offer) => Ok(Advance(P::Connecting)),
            // Renegotiation (ICE restart) keeps the phase
            (P::Connecting | P::Active, E::Offer | E::Answer | E::IceCandidate) => Ok(Stay),

            (P::Connecting, E::Connected) => Ok(Advance(P::Active)),
            (P::Active, E::Connected) => Ok(Ignore),

            (P::Accepted | P::Connecting | P::Active, E::End(_)) => Ok(Advance(P::Ended)),

            (_, E::Disconnect) => Ok(Advance(P::Failed)),

            _ => Err(CallStateError::InvalidTransition {
                phase: self,
                event,
            }),
        }
    }
}
