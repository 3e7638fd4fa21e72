//! Per-topic message history for broker replay.
//!
//! Each message key is a zero-padded millisecond timestamp plus a UUID, so a
//! tree scan yields messages in chronological order and TTL cleanup can read
//! the age straight from the key.
//!
//! Policy:
//! - `ttl_seconds`: messages older than this are removed on load, and a
//!   topic left with no messages loses its tree
//! - `max_messages_per_topic`: when exceeded, the oldest messages are removed

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::{Db, IVec, Tree};
use tracing::warn;
use uuid::Uuid;

const TREE_PREFIX: &str = "history/";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub topic: String,
    pub payload: String,
    pub timestamp: i64,
}

#[derive(Clone)]
pub struct MessageHistory {
    db: Db,
    ttl_seconds: Option<i64>,
    max_messages_per_topic: Option<usize>,
}

impl MessageHistory {
    pub fn new(db: Db, ttl_seconds: Option<i64>, max_messages_per_topic: Option<usize>) -> Self {
        Self {
            db,
            ttl_seconds,
            max_messages_per_topic,
        }
    }

    /// History in its own sled database at `path`, for deployments whose
    /// records live elsewhere.
    pub fn open(
        path: &str,
        ttl_seconds: Option<i64>,
        max_messages_per_topic: Option<usize>,
    ) -> Result<Self, sled::Error> {
        Ok(Self::new(sled::open(path)?, ttl_seconds, max_messages_per_topic))
    }

    /// Name of the sled tree holding a topic's history.
    pub fn tree_name(topic: &str) -> String {
        format!("{TREE_PREFIX}{topic}")
    }

    pub fn is_history_tree(name: &[u8]) -> bool {
        name.starts_with(TREE_PREFIX.as_bytes())
    }

    /// The topic's tree, created on first use.
    fn topic_tree(&self, topic: &str) -> Option<Tree> {
        self.db
            .open_tree(Self::tree_name(topic))
            .inspect_err(|e| warn!("Failed to open history tree for '{topic}': {e}"))
            .ok()
    }

    /// The topic's tree if anything was ever stored for it. Subscribing to
    /// an unknown topic must not leave a tree behind.
    fn existing(&self, topic: &str) -> Option<Tree> {
        let name = Self::tree_name(topic);
        let known = self
            .db
            .tree_names()
            .iter()
            .any(|n| n.as_ref() == name.as_bytes());
        if known { self.topic_tree(topic) } else { None }
    }

    /// Record a message, then trim the topic down to the retention cap.
    pub fn store_message(&self, topic: &str, payload: &str) {
        let entry = StoredMessage {
            topic: topic.to_string(),
            payload: payload.to_string(),
            timestamp: Utc::now().timestamp_millis(),
        };
        let Some(tree) = self.topic_tree(topic) else {
            return;
        };

        let stored = serde_json::to_vec(&entry)
            .map_err(|e| e.to_string())
            .and_then(|value| {
                tree.insert(entry_key(entry.timestamp), value)
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = stored {
            warn!("Dropping history entry for '{topic}': {e}");
            return;
        }

        let Some(cap) = self.max_messages_per_topic else {
            return;
        };
        let surplus = tree.len().saturating_sub(cap);
        let oldest: Vec<_> = tree.iter().keys().take(surplus).flatten().collect();
        remove_all(&tree, topic, oldest);
    }

    /// Messages retained for `topic`, oldest first.
    pub fn load_messages(&self, topic: &str) -> Vec<StoredMessage> {
        let Some(tree) = self.existing(topic) else {
            return Vec::new();
        };
        self.expire(topic, &tree);

        tree.iter()
            .values()
            .filter_map(|value| value.ok())
            .filter_map(|value| serde_json::from_slice(&value).ok())
            .collect()
    }

    /// Remove expired messages, and the tree itself once nothing is left.
    fn expire(&self, topic: &str, tree: &Tree) {
        if let Some(ttl) = self.ttl_seconds {
            let cutoff = Utc::now().timestamp_millis() - ttl * 1000;
            let expired: Vec<_> = tree
                .iter()
                .keys()
                .flatten()
                .take_while(|key| key_timestamp(key).is_some_and(|ts| ts < cutoff))
                .collect();
            remove_all(tree, topic, expired);
        }

        if tree.is_empty() {
            if let Err(e) = self.db.drop_tree(Self::tree_name(topic)) {
                warn!("Failed to drop empty history tree for '{topic}': {e}");
            }
        }
    }

    /// Number of topics that currently hold history.
    pub fn topic_count(&self) -> usize {
        self.db
            .tree_names()
            .iter()
            .filter(|name| Self::is_history_tree(name))
            .count()
    }

    /// Drop every topic's history.
    pub fn clear(&self) -> Result<(), sled::Error> {
        for name in self.db.tree_names() {
            if Self::is_history_tree(&name) {
                self.db.drop_tree(name)?;
            }
        }
        Ok(())
    }
}

fn entry_key(timestamp: i64) -> Vec<u8> {
    format!("{timestamp:020}_{}", Uuid::new_v4()).into_bytes()
}

fn remove_all(tree: &Tree, topic: &str, keys: Vec<IVec>) {
    for key in keys {
        if let Err(e) = tree.remove(key) {
            warn!("Failed to remove history entry from '{topic}': {e}");
        }
    }
}

fn key_timestamp(key: &[u8]) -> Option<i64> {
    let key = std::str::from_utf8(key).ok()?;
    let (ts, _) = key.split_once('_')?;
    ts.parse().ok()
}

impl std::fmt::Debug for MessageHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHistory")
            .field("db", &"sled::Db")
            .field("ttl_seconds", &self.ttl_seconds)
            .field("max_messages_per_topic", &self.max_messages_per_topic)
            .finish()
    }
}
