//! Session (room) bookkeeping.

use chrono::{DateTime, Utc};
use sb_common::{Identity, IdentityKey, RoomId};
use tokio::task::AbortHandle;

use super::record::CallRecord;
use super::state::{CallPhase, CallStateError, Party, PhaseEvent, Transition};

/// One call attempt between two fixed participants.
#[derive(Debug)]
pub struct Session {
    pub room_id: RoomId,
    pub caller: Identity,
    pub callee: Identity,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    phase: CallPhase,
    history: Vec<CallPhase>,
    ring_timer: Option<AbortHandle>,
}

impl Session {
    #[must_use]
    pub fn new(room_id: RoomId, caller: Identity, callee: Identity) -> Self {
        Self {
            room_id,
            caller,
            callee,
            created_at: Utc::now(),
            accepted_at: None,
            ended_at: None,
            phase: CallPhase::Requested,
            history: vec![CallPhase::Requested],
            ring_timer: None,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> CallPhase {
        self.phase
    }

    /// Every phase visited, in order.
    #[must_use]
    pub fn history(&self) -> &[CallPhase] {
        &self.history
    }

    /// Which side `key` is on, if a participant at all.
    #[must_use]
    pub fn party_of(&self, key: &IdentityKey) -> Option<Party> {
        if self.caller.key() == *key {
            Some(Party::Caller)
        } else if self.callee.key() == *key {
            Some(Party::Callee)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn participant(&self, party: Party) -> &Identity {
        match party {
            Party::Caller => &self.caller,
            Party::Callee => &self.callee,
        }
    }

    /// Keep the ring timer so it can be cancelled once the callee responds.
    pub fn set_ring_timer(&mut self, handle: AbortHandle) {
        self.ring_timer = Some(handle);
    }

    /// Run `event` through the state machine and record the result.
    pub fn apply(&mut self, event: PhaseEvent) -> Result<Transition, CallStateError> {
        let transition = self.phase.apply(event)?;

        if let Transition::Advance(next) = transition {
            self.phase = next;
            self.history.push(next);

            if next != CallPhase::Ringing {
                if let Some(timer) = self.ring_timer.take() {
                    timer.abort();
                }
            }
            if next == CallPhase::Accepted {
                self.accepted_at = Some(Utc::now());
            }
            if next.is_terminal() {
                self.ended_at = Some(Utc::now());
            }
        }

        Ok(transition)
    }

    /// Seconds between acceptance and end; zero if never accepted.
    #[must_use]
    pub fn duration_seconds(&self) -> u64 {
        match (self.accepted_at, self.ended_at) {
            (Some(start), Some(end)) => u64::try_from((end - start).num_seconds()).unwrap_or(0),
            _ => 0,
        }
    }

    /// History record, once terminal.
    #[must_use]
    pub fn to_record(&self) -> Option<CallRecord> {
        let outcome = self.phase.outcome()?;
        Some(CallRecord {
            room_id: self.room_id,
            caller: self.caller.clone(),
            callee: self.callee.clone(),
            started_at: self.created_at,
            answered_at: self.accepted_at,
            ended_at: self.ended_at.unwrap_or_else(Utc::now),
            outcome,
            duration_seconds: self.duration_seconds(),
        })
    }
}
