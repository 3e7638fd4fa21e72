//! WebSocket front of the embedded broker.
//!
//! Defines the JSON frames exchanged with app subscribers and the server
//! that turns them into broker operations.

pub mod message;
pub mod websocket;
