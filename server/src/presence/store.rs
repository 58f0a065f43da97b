//! Presence storage backends.

use dashmap::DashMap;
use sb_common::IdentityKey;
use uuid::Uuid;

use super::types::PresenceEntry;

/// Keyed storage behind the presence registry.
///
/// Implementations must be safe to call from every connection task at once
/// and must make each method atomic with respect to a single key.
pub trait PresenceStore: Send + Sync + 'static {
    /// Insert or replace the entry for its identity, returning the replaced entry.
    fn put(&self, entry: PresenceEntry) -> Option<PresenceEntry>;

    /// Fetch a copy of the entry.
    fn get(&self, key: &IdentityKey) -> Option<PresenceEntry>;

    /// Remove the entry. With `connection_id`, only if it still belongs to that connection.
    fn remove(&self, key: &IdentityKey, connection_id: Option<Uuid>) -> Option<PresenceEntry>;

    /// Mutate the entry in place, returning the updated copy.
    fn modify(
        &self,
        key: &IdentityKey,
        f: &mut dyn FnMut(&mut PresenceEntry),
    ) -> Option<PresenceEntry>;

    /// All entries of one tenant.
    fn tenant_entries(&self, tenant_id: Uuid) -> Vec<PresenceEntry>;
}

/// Single-instance store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    entries: DashMap<IdentityKey, PresenceEntry>,
}

impl MemoryPresenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PresenceStore for MemoryPresenceStore {
    fn put(&self, entry: PresenceEntry) -> Option<PresenceEntry> {
        self.entries.insert(entry.identity.key(), entry)
    }

    fn get(&self, key: &IdentityKey) -> Option<PresenceEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    fn remove(&self, key: &IdentityKey, connection_id: Option<Uuid>) -> Option<PresenceEntry> {
        match connection_id {
            None => self.entries.remove(key).map(|(_, e)| e),
            Some(id) => self
                .entries
                .remove_if(key, |_, e| e.handle.connection_id == id)
                .map(|(_, e)| e),
        }
    }

    fn modify(
        &self,
        key: &IdentityKey,
        f: &mut dyn FnMut(&mut PresenceEntry),
    ) -> Option<PresenceEntry> {
        let mut entry = self.entries.get_mut(key)?;
        f(entry.value_mut());
        Some(entry.value().clone())
    }

    fn tenant_entries(&self, tenant_id: Uuid) -> Vec<PresenceEntry> {
        self.entries
            .iter()
            .filter(|e| e.key().tenant_id == tenant_id)
            .map(|e| e.value().clone())
            .collect()
    }
}
