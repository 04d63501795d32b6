//! WebSocket module for the real-time dispatch channel
//!
//! Session registry, wire protocol types, and the axum socket handler.

pub mod connection;
pub mod handler;
pub mod messages;

pub use connection::{ConnectionId, SessionRegistry, WsSender};
pub use handler::ws_handler;
pub use messages::{ClientEvent, ServerEvent};
