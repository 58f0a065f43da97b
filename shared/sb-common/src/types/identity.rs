//! Identity Types

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is on the other end of a control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Tenant staff member using the CRM dashboard.
    InternalAgent,
    /// External customer signed in to the tenant's portal.
    PortalCustomer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InternalAgent => f.write_str("internal_agent"),
            Self::PortalCustomer => f.write_str("portal_customer"),
        }
    }
}

/// Tenant-scoped address of an identity.
///
/// Two identities with the same `id` in different tenants are distinct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityKey {
    /// Tenant the identity belongs to.
    pub tenant_id: Uuid,
    /// User ID (agents) or contact ID (portal customers).
    pub id: Uuid,
}

impl IdentityKey {
    #[must_use]
    pub const fn new(tenant_id: Uuid, id: Uuid) -> Self {
        Self { tenant_id, id }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant_id, self.id)
    }
}

/// Authenticated participant, fixed for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// User ID (agents) or contact ID (portal customers).
    pub id: Uuid,
    /// Tenant the identity belongs to.
    pub tenant_id: Uuid,
    /// Participant role.
    pub role: Role,
    /// Name shown on the other party's incoming-call prompt.
    pub display_name: String,
}

impl Identity {
    /// Tenant-scoped key used for presence and session lookups.
    #[must_use]
    pub const fn key(&self) -> IdentityKey {
        IdentityKey::new(self.tenant_id, self.id)
    }
}
