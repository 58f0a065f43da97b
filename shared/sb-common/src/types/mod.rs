//! Shared domain types.

mod call;
mod identity;

pub use call::{CallOutcome, IceCandidate, IceServer, PresenceStatus, RoomId};
pub use identity::{Identity, IdentityKey, Role};
