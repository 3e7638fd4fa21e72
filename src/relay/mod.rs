//! Event relay
//!
//! Turns a persisted match state change into one [`MatchEvent`] published on
//! the topic derived from the match id or its city. Callers invoke the relay
//! only after the store accepted the write.
//!
//! A failed publish is logged and swallowed: the state change is already
//! durable and the REST caller still gets its response. Delivery guarantees
//! beyond that belong to the backend's QoS.

pub mod event;
pub mod publisher;
pub mod topic;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::domain::{Id, Match, MatchSummary, User};
pub use event::{MatchEvent, Publication, Qos};
pub use publisher::{
    BrokerPublisher, DisabledPublisher, MemoryPublisher, MqttPublisher, PublishError, Published,
    Publisher,
};

#[derive(Clone)]
pub struct EventRelay {
    publisher: Arc<dyn Publisher>,
}

impl EventRelay {
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self { publisher }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledPublisher))
    }

    pub fn backend(&self) -> &'static str {
        self.publisher.backend()
    }

    /// Serialize and publish, surfacing any failure.
    pub async fn publish(&self, publication: &Publication) -> Result<(), PublishError> {
        let payload = publication.event.to_payload()?;
        self.publisher
            .publish(&publication.topic, payload, publication.qos())
            .await
    }

    /// Publish, logging failures instead of returning them.
    pub async fn emit(&self, publication: Publication) {
        match self.publish(&publication).await {
            Ok(()) => debug!(
                topic = %publication.topic,
                event = publication.event.name(),
                "Published event"
            ),
            Err(e) => warn!(
                topic = %publication.topic,
                event = publication.event.name(),
                "Failed to publish event: {e}"
            ),
        }
    }

    pub async fn new_match(&self, summary: &MatchSummary) {
        let topic = topic::city_matches(&summary.city);
        self.emit(Publication::new(topic, MatchEvent::NewMatch(summary.clone())))
            .await;
    }

    pub async fn player_joined(
        &self,
        match_id: Id,
        user: &User,
        player_count: u32,
        joined_at: DateTime<Utc>,
    ) {
        let event = MatchEvent::PlayerJoined {
            user_id: user.id,
            user_name: user.name.clone(),
            player_count,
            joined_at,
        };
        self.emit(Publication::new(topic::match_updates(match_id), event))
            .await;
    }

    pub async fn player_left(&self, match_id: Id, user: &User, player_count: u32) {
        let event = MatchEvent::PlayerLeft {
            user_id: user.id,
            user_name: user.name.clone(),
            player_count,
        };
        self.emit(Publication::new(topic::match_updates(match_id), event))
            .await;
    }

    pub async fn match_canceled(&self, m: &Match) {
        let event = MatchEvent::MatchCanceled {
            match_id: m.id,
            canceled_at: m.updated_at.unwrap_or_else(Utc::now),
        };
        self.emit(Publication::new(topic::match_updates(m.id), event))
            .await;
    }

    pub async fn match_started(&self, m: &Match) {
        let event = MatchEvent::MatchStarted {
            match_id: m.id,
            started_at: m.updated_at.unwrap_or_else(Utc::now),
        };
        self.emit(Publication::new(topic::match_live_updates(m.id), event))
            .await;
    }

    pub async fn score_updated(&self, m: &Match) {
        let event = MatchEvent::ScoreUpdated {
            match_id: m.id,
            home_score: m.score.home,
            away_score: m.score.away,
            updated_at: m.updated_at.unwrap_or_else(Utc::now),
        };
        self.emit(Publication::new(topic::match_live_updates(m.id), event))
            .await;
    }

    pub async fn match_finished(&self, m: &Match) {
        let event = MatchEvent::MatchFinished {
            match_id: m.id,
            home_score: m.score.home,
            away_score: m.score.away,
            finished_at: m.updated_at.unwrap_or_else(Utc::now),
        };
        self.emit(Publication::new(topic::match_live_updates(m.id), event))
            .await;
    }

    pub async fn shutdown(&self) {
        self.publisher.shutdown().await;
    }
}

#[cfg(test)]
mod tests;
