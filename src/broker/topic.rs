//! Topic registry entries
//!
//! Topic names follow the relay's scheme (`futside/match/{id}/updates`,
//! `futside/match/{id}/live_updates`, `futside/matches/{city}`) but the
//! broker treats them as opaque strings.

use std::collections::HashSet;

pub type SubscriberId = String;

#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscribers: HashSet<SubscriberId>,
}

impl Topic {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscribers: HashSet::new(),
        }
    }

    /// Returns `false` if `id` was already subscribed.
    pub fn subscribe(&mut self, id: SubscriberId) -> bool {
        self.subscribers.insert(id)
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&mut self, id: &SubscriberId) -> bool {
        self.subscribers.remove(id)
    }

    pub fn is_idle(&self) -> bool {
        self.subscribers.is_empty()
    }
}
