//! Broker engine
//!
//! In-memory fan-out for the embedded relay backend:
//! - managing topics and subscriber lists
//! - delivering backend publications to every subscriber of a topic
//! - tracking QoS >= 1 messages until a subscriber acks them, re-sending
//!   after a timeout and dropping after a bounded number of retries
//! - recording publications in a [`MessageHistory`] and replaying it to new
//!   subscribers
//!
//! The API is synchronous and meant to sit behind `Arc<Mutex<Broker>>`.
//! Never hold that lock across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use super::message::Message;
use super::topic::{SubscriberId, Topic};
use crate::client::Client;
use crate::persistence::MessageHistory;

#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub message: Message,
    pub sent_at: i64,
    pub retries: u8,
}

/// What one pass of the retry loop did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub resent: usize,
    pub dropped: usize,
}

#[derive(Debug, Default)]
pub struct Broker {
    pub topics: HashMap<String, Topic>,
    pub clients: HashMap<SubscriberId, Client>,
    pub pending_acks: HashMap<String, PendingMessage>,
    history: Option<MessageHistory>,
}

impl Broker {
    /// Maximum number of delivery retries for QoS 1 messages before dropping.
    pub const MAX_RETRIES: u8 = 5;

    /// Milliseconds after which an un-acked message is eligible for retry.
    pub const ACK_TIMEOUT_MS: i64 = 5000;

    /// A broker without replay history.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: MessageHistory) -> Self {
        Self {
            history: Some(history),
            ..Self::default()
        }
    }

    pub fn register_client(&mut self, client: Client) {
        self.clients.insert(client.id.clone(), client);
    }

    pub fn remove_client(&mut self, client_id: &SubscriberId) -> Option<Client> {
        self.clients.remove(client_id)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Subscribe, creating the topic if needed, then replay its history to
    /// the subscriber.
    pub fn subscribe(&mut self, topic: &str, subscriber: SubscriberId) {
        let topic = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic));
        if !topic.subscribe(subscriber.clone()) {
            debug!("{subscriber} is already subscribed to '{}'", topic.name);
            return;
        }

        let (Some(history), Some(client)) = (&self.history, self.clients.get(&subscriber)) else {
            return;
        };
        for stored in history.load_messages(&topic.name) {
            let replay_msg = Message {
                topic: stored.topic,
                payload: stored.payload,
                timestamp: stored.timestamp,
                message_id: Uuid::new_v4().to_string(),
                qos: 0,
            };
            if let Ok(json) = serde_json::to_string(&replay_msg) {
                let _ = client.sender.send(WsMessage::text(json));
            }
        }
    }

    pub fn unsubscribe(&mut self, topic: &str, subscriber: &SubscriberId) {
        let removed = self
            .topics
            .get_mut(topic)
            .is_some_and(|t| t.unsubscribe(subscriber));
        if removed {
            self.topics.retain(|_, t| !t.is_idle());
        }
    }

    /// Deliver `msg` to the current subscribers of its topic and return how
    /// many of them it was handed to. QoS 2 is downgraded to 1. A QoS 1
    /// message waits for an ack only if it reached at least one subscriber.
    pub fn publish(&mut self, mut msg: Message) -> usize {
        msg.timestamp = chrono::Utc::now().timestamp_millis();
        msg.qos = msg.qos.min(1);

        if msg.message_id.is_empty() {
            msg.message_id = Uuid::new_v4().to_string();
        }

        if let Some(history) = &self.history {
            history.store_message(&msg.topic, &msg.payload);
        }

        let delivered = self.deliver(&msg);
        if delivered == 0 {
            debug!("No subscribers on '{}'", msg.topic);
        } else if msg.qos == 1 {
            // only a message someone received can be acknowledged
            self.pending_acks.insert(
                msg.message_id.clone(),
                PendingMessage {
                    sent_at: msg.timestamp,
                    message: msg,
                    retries: 0,
                },
            );
        }
        delivered
    }

    fn deliver(&self, msg: &Message) -> usize {
        let Some(topic) = self.topics.get(&msg.topic) else {
            return 0;
        };
        let text = match serde_json::to_string(msg) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize message: {e}");
                return 0;
            }
        };
        let ws_msg = WsMessage::text(text);

        let mut delivered = 0;
        for sub_id in &topic.subscribers {
            match self.clients.get(sub_id) {
                Some(client) => match client.sender.send(ws_msg.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => warn!("Failed to send to {sub_id}: {e}"),
                },
                None => warn!("No client registered with id: {sub_id}"),
            }
        }
        delivered
    }

    pub fn handle_ack(&mut self, message_id: &str) -> bool {
        if self.pending_acks.remove(message_id).is_some() {
            debug!("ACK received for message_id: {message_id}");
            true
        } else {
            warn!("Received ACK for unknown message_id: {message_id}");
            false
        }
    }

    pub fn cleanup_client(&mut self, client_id: &SubscriberId) {
        let removed = self.remove_client(client_id);

        for topic in self.topics.values_mut() {
            topic.unsubscribe(client_id);
        }
        self.topics.retain(|_, t| !t.is_idle());

        match removed {
            Some(client) => info!(
                "Cleaned up {client_id} after {}s",
                (chrono::Utc::now() - client.connected_at).num_seconds()
            ),
            None => debug!("Cleaned up unknown client {client_id}"),
        }
    }

    /// Re-send un-acked messages older than [`Self::ACK_TIMEOUT_MS`] and drop
    /// those that used up [`Self::MAX_RETRIES`].
    pub fn retry_pending(&mut self, now_ms: i64) -> RetryReport {
        let mut report = RetryReport::default();
        let mut messages_to_resend = Vec::new();
        let mut messages_to_drop = Vec::new();

        for (message_id, pending_msg) in &self.pending_acks {
            if now_ms - pending_msg.sent_at > Self::ACK_TIMEOUT_MS {
                if pending_msg.retries >= Self::MAX_RETRIES {
                    messages_to_drop.push(message_id.clone());
                } else {
                    messages_to_resend.push(message_id.clone());
                }
            }
        }

        for message_id in messages_to_drop {
            if self.pending_acks.remove(&message_id).is_some() {
                warn!(
                    "Message {} dropped after {} retries.",
                    message_id,
                    Self::MAX_RETRIES
                );
                report.dropped += 1;
            }
        }

        for message_id in messages_to_resend {
            let Some(pending_msg) = self.pending_acks.get_mut(&message_id) else {
                continue;
            };
            pending_msg.sent_at = now_ms;
            pending_msg.retries += 1;
            debug!(
                "Re-sending message {} (retry {})",
                message_id, pending_msg.retries
            );
            let msg = pending_msg.message.clone();
            self.deliver(&msg);
            report.resent += 1;
        }

        report
    }

    /// Run [`Broker::retry_pending`] once a second, forever.
    pub async fn start_retry_loop(broker: Arc<Mutex<Broker>>) {
        let mut tick = tokio::time::interval(Duration::from_millis(1000));
        loop {
            tick.tick().await;
            let now = chrono::Utc::now().timestamp_millis();
            let mut broker = super::lock(&broker);
            broker.retry_pending(now);
        }
    }
}
