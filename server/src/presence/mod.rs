//! Presence
//!
//! Who is reachable on a control channel, and whether they can take a call.

mod registry;
mod store;
mod types;

pub use registry::PresenceRegistry;
pub use store::{MemoryPresenceStore, PresenceStore};
pub use types::{ConnectionHandle, OnlineSnapshot, PresenceEntry};
