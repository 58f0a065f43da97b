//! Presence Registry
//!
//! Single source of truth for "is this identity reachable right now", and the
//! only way the relay reaches a participant's control channel.

use std::sync::Arc;

use chrono::Utc;
use sb_common::protocol::ServerEvent;
use sb_common::{Identity, IdentityKey, PresenceStatus, Role};
use tracing::{debug, info};
use uuid::Uuid;

use super::store::{MemoryPresenceStore, PresenceStore};
use super::types::{ConnectionHandle, OnlineSnapshot, PresenceEntry};

/// Tracks connected identities and their call availability.
#[derive(Clone)]
pub struct PresenceRegistry {
    store: Arc<dyn PresenceStore>,
}

impl PresenceRegistry {
    /// Create a registry over the given store.
    #[must_use]
    pub fn new(store: Arc<dyn PresenceStore>) -> Self {
        Self { store }
    }

    /// Create a registry for a single-instance deployment.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPresenceStore::new()))
    }

    /// Register a connection for `identity`, replacing any previous one.
    pub fn register(&self, identity: Identity, handle: ConnectionHandle) {
        let key = identity.key();
        let connection_id = handle.connection_id;

        if let Some(previous) = self.store.put(PresenceEntry::new(identity, handle)) {
            info!(
                identity = %key,
                old_connection = %previous.handle.connection_id,
                new_connection = %connection_id,
                "Presence entry replaced by reconnect"
            );
        } else {
            debug!(identity = %key, connection_id = %connection_id, "Presence registered");
        }

        self.broadcast_status(key, PresenceStatus::Online);
    }

    /// Remove the entry for `key`. No-op if absent.
    pub fn unregister(&self, key: &IdentityKey) -> bool {
        self.remove(key, None)
    }

    /// Remove the entry only if it still belongs to `connection_id`.
    ///
    /// Returns `false` when a newer connection has taken over the identity.
    pub fn unregister_connection(&self, key: &IdentityKey, connection_id: Uuid) -> bool {
        self.remove(key, Some(connection_id))
    }

    fn remove(&self, key: &IdentityKey, connection_id: Option<Uuid>) -> bool {
        if self.store.remove(key, connection_id).is_some() {
            debug!(identity = %key, "Presence unregistered");
            self.broadcast_status(*key, PresenceStatus::Offline);
            true
        } else {
            false
        }
    }

    /// Mark `key` as in a call. No-op if not registered.
    pub fn set_busy(&self, key: &IdentityKey) {
        self.set_status(key, PresenceStatus::Busy);
    }

    /// Mark `key` as available again. No-op if not registered.
    pub fn set_idle(&self, key: &IdentityKey) {
        self.set_status(key, PresenceStatus::Online);
    }

    fn set_status(&self, key: &IdentityKey, status: PresenceStatus) {
        let mut changed = false;
        self.store.modify(key, &mut |entry| {
            changed = entry.status != status;
            entry.status = status;
        });

        if changed {
            self.broadcast_status(*key, status);
        }
    }

    /// Refresh `last_seen_at` after inbound traffic.
    pub fn touch(&self, key: &IdentityKey) {
        self.store.modify(key, &mut |entry| entry.last_seen_at = Utc::now());
    }

    /// Current entry for `key`, if reachable.
    #[must_use]
    pub fn lookup(&self, key: &IdentityKey) -> Option<PresenceEntry> {
        self.store.get(key).filter(|entry| !entry.handle.is_closed())
    }

    /// Snapshot of the tenant's reachable identities, optionally filtered by role.
    #[must_use]
    pub fn list_online(&self, tenant_id: Uuid, role: Option<Role>) -> OnlineSnapshot {
        let mut entries = self.store.tenant_entries(tenant_id);
        entries.retain(|entry| !entry.handle.is_closed());
        OnlineSnapshot::new(entries, role)
    }

    /// Deliver `event` to whichever connection currently holds `key`.
    pub fn send(&self, key: &IdentityKey, event: ServerEvent) -> bool {
        match self.store.get(key) {
            Some(entry) => entry.handle.send(event),
            None => {
                debug!(identity = %key, "Dropping event for unreachable identity");
                false
            }
        }
    }

    /// Tell the rest of the tenant that `key` changed availability.
    fn broadcast_status(&self, key: IdentityKey, status: PresenceStatus) {
        let event = ServerEvent::PresenceUpdate {
            identity: key,
            status,
        };
        for entry in self.store.tenant_entries(key.tenant_id) {
            if entry.identity.key() != key {
                entry.handle.send(event.clone());
            }
        }
    }
}
