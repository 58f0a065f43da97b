//! Call Signaling Server
//!
//! Presence tracking, two-party call sessions, and the signaling relay that
//! carries call control and media negotiation between participants.

pub mod api;
pub mod auth;
pub mod call;
pub mod config;
pub mod presence;
pub mod ws;
