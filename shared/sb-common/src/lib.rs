//! Switchboard Common Library
//!
//! Shared types and the control-channel protocol used by both server and client.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
