//! Control channel transport.

mod websocket;

pub use websocket::{ConnectionConfig, ConnectionError, ConnectionStatus, SignalingConnection};
