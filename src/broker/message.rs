//! Broker message
//!
//! `Message` is what subscribers receive and what the broker keeps pending
//! until acknowledged.
//!
//! - `payload`: the relay's JSON event, as a string
//! - `timestamp`: milliseconds since the UNIX epoch, set on publish
//! - `message_id`: opaque id subscribers echo back in `ack`
//! - `qos`: `0` = at-most-once, `1` = at-least-once
//!
//! On the wire it carries `"type": "message"`, the same frame the transport
//! describes as `ServerMessage::Message`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "message")]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub timestamp: i64,
    pub message_id: String,
    pub qos: u8,
}
