//! Session Directory
//!
//! Room id to session map plus an index of which room each identity is in.
//! Each session sits behind its own mutex, so messages for one room are
//! serialized while different rooms proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use dashmap::{mapref::entry::Entry, DashMap};
use sb_common::{IdentityKey, RoomId};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

use super::session::Session;

/// Shared handle to one room.
pub type SharedSession = Arc<Mutex<Session>>;

/// Which participant could not be reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveError {
    CallerBusy,
    CalleeBusy,
}

#[derive(Debug, Default)]
pub struct SessionDirectory {
    rooms: DashMap<RoomId, SharedSession>,
    participants: DashMap<IdentityKey, RoomId>,
}

impl SessionDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim both identities for `room_id`.
    ///
    /// All or nothing: if the callee is taken, the caller's claim is released.
    pub fn reserve(
        &self,
        caller: IdentityKey,
        callee: IdentityKey,
        room_id: RoomId,
    ) -> Result<(), ReserveError> {
        match self.participants.entry(caller) {
            Entry::Occupied(_) => return Err(ReserveError::CallerBusy),
            Entry::Vacant(slot) => {
                slot.insert(room_id);
            }
        }

        match self.participants.entry(callee) {
            Entry::Occupied(_) => {
                self.participants.remove_if(&caller, |_, r| *r == room_id);
                Err(ReserveError::CalleeBusy)
            }
            Entry::Vacant(slot) => {
                slot.insert(room_id);
                Ok(())
            }
        }
    }

    /// Add a session whose participants were reserved.
    ///
    /// The room is published already locked: nothing else can act on it
    /// until the returned guard is dropped.
    pub async fn insert(&self, session: Session) -> OwnedMutexGuard<Session> {
        let room_id = session.room_id;
        let shared = Arc::new(Mutex::new(session));
        let guard = Arc::clone(&shared).lock_owned().await;
        self.rooms.insert(room_id, shared);
        guard
    }

    #[must_use]
    pub fn get(&self, room_id: &RoomId) -> Option<SharedSession> {
        self.rooms.get(room_id).map(|r| Arc::clone(r.value()))
    }

    /// Room `key` is currently participating in.
    #[must_use]
    pub fn room_of(&self, key: &IdentityKey) -> Option<RoomId> {
        self.participants.get(key).map(|r| *r.value())
    }

    /// Free both participants of a terminal session so they can call again.
    pub fn release(&self, session: &Session) {
        let room_id = session.room_id;
        for key in [session.caller.key(), session.callee.key()] {
            self.participants.remove_if(&key, |_, r| *r == room_id);
        }
    }

    /// Drop the room after `retention`, so late duplicates still find it.
    pub fn retire(self: &Arc<Self>, room_id: RoomId, retention: Duration) {
        let directory = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            directory.rooms.remove(&room_id);
            debug!(room_id = %room_id, "Session retired");
        });
    }

    /// Number of rooms held, live or retained.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
