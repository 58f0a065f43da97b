//! Presence entry types.

use chrono::{DateTime, Utc};
use sb_common::protocol::{OnlineEntry, ServerEvent};
use sb_common::{Identity, PresenceStatus, Role};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;
use uuid::Uuid;

/// Outbound half of one control-channel connection.
///
/// Cloning is cheap; all clones feed the same connection's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    /// Distinguishes a reconnect from the connection it replaced.
    pub connection_id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// Wrap the writer queue of a freshly accepted connection.
    #[must_use]
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            connection_id: Uuid::now_v7(),
            tx,
        }
    }

    /// Queue an event without waiting.
    ///
    /// Delivery is best effort: a full or closed queue drops the event and
    /// returns `false`. A dead peer is cleaned up by the disconnect path.
    pub fn send(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %self.connection_id, "Outbound queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Whether the connection's writer task has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A reachable identity.
#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub identity: Identity,
    pub handle: ConnectionHandle,
    pub status: PresenceStatus,
    pub last_seen_at: DateTime<Utc>,
}

impl PresenceEntry {
    #[must_use]
    pub fn new(identity: Identity, handle: ConnectionHandle) -> Self {
        Self {
            identity,
            handle,
            status: PresenceStatus::Online,
            last_seen_at: Utc::now(),
        }
    }

    /// Wire form for `online_list` replies.
    #[must_use]
    pub fn to_online_entry(&self) -> OnlineEntry {
        OnlineEntry {
            identity: self.identity.clone(),
            status: self.status,
            last_seen_at: self.last_seen_at,
        }
    }
}

/// Point-in-time view of a tenant's reachable identities.
///
/// Not a live stream: callers poll. Iteration is lazy and may be repeated.
#[derive(Debug, Clone)]
pub struct OnlineSnapshot {
    entries: Vec<PresenceEntry>,
    role: Option<Role>,
    taken_at: DateTime<Utc>,
}

impl OnlineSnapshot {
    pub(crate) fn new(entries: Vec<PresenceEntry>, role: Option<Role>) -> Self {
        Self {
            entries,
            role,
            taken_at: Utc::now(),
        }
    }

    /// Entries matching the role filter.
    pub fn iter(&self) -> impl Iterator<Item = &PresenceEntry> + '_ {
        self.entries
            .iter()
            .filter(move |e| self.role.is_none_or(|role| e.identity.role == role))
    }

    /// When the snapshot was taken.
    #[must_use]
    pub const fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Wire form, sorted by display name for stable UI ordering.
    #[must_use]
    pub fn to_online_entries(&self) -> Vec<OnlineEntry> {
        let mut entries: Vec<OnlineEntry> = self.iter().map(PresenceEntry::to_online_entry).collect();
        entries.sort_by(|a, b| a.identity.display_name.cmp(&b.identity.display_name));
        entries
    }
}
