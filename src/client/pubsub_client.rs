//! Client representation
//!
//! `Client` models one app connected to the embedded broker and holds the
//! sending side of its per-connection channel.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

#[derive(Debug)]
pub struct Client {
    pub id: String,
    pub sender: UnboundedSender<WsMessage>,
    pub connected_at: DateTime<Utc>,
}

impl Client {
    pub fn new(sender: UnboundedSender<WsMessage>) -> Self {
        Self {
            id: format!("client-{}", Uuid::new_v4()),
            sender,
            connected_at: Utc::now(),
        }
    }
}
