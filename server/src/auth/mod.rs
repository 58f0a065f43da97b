//! Handshake Authentication
//!
//! Identities are minted by the external auth service; this module only
//! verifies them, both on the WebSocket upgrade and on HTTP routes.

mod error;
pub mod jwt;
mod middleware;

pub use error::{AuthError, AuthResult};
pub use middleware::{require_auth, AuthIdentity};
