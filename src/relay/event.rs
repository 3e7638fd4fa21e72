//! The event envelope published for every match state change.
//!
//! On the wire an event is `{"event": "<name>", "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Id, MatchSummary};

/// MQTT delivery guarantee requested for a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Qos {
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl Qos {
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum MatchEvent {
    NewMatch(MatchSummary),
    PlayerJoined {
        user_id: Id,
        user_name: String,
        player_count: u32,
        joined_at: DateTime<Utc>,
    },
    PlayerLeft {
        user_id: Id,
        user_name: String,
        player_count: u32,
    },
    MatchCanceled {
        match_id: Id,
        canceled_at: DateTime<Utc>,
    },
    MatchStarted {
        match_id: Id,
        started_at: DateTime<Utc>,
    },
    ScoreUpdated {
        match_id: Id,
        home_score: u32,
        away_score: u32,
        updated_at: DateTime<Utc>,
    },
    MatchFinished {
        match_id: Id,
        home_score: u32,
        away_score: u32,
        finished_at: DateTime<Utc>,
    },
}

impl MatchEvent {
    /// The `event` tag as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            MatchEvent::NewMatch(_) => "new_match",
            MatchEvent::PlayerJoined { .. } => "player_joined",
            MatchEvent::PlayerLeft { .. } => "player_left",
            MatchEvent::MatchCanceled { .. } => "match_canceled",
            MatchEvent::MatchStarted { .. } => "match_started",
            MatchEvent::ScoreUpdated { .. } => "score_updated",
            MatchEvent::MatchFinished { .. } => "match_finished",
        }
    }

    /// Roster changes are published exactly-once, everything else
    /// at-least-once.
    pub fn qos(&self) -> Qos {
        match self {
            MatchEvent::PlayerJoined { .. } | MatchEvent::PlayerLeft { .. } => Qos::ExactlyOnce,
            _ => Qos::AtLeastOnce,
        }
    }

    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// An event bound to the topic it is published on.
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub topic: String,
    pub event: MatchEvent,
}

impl Publication {
    pub fn new(topic: String, event: MatchEvent) -> Self {
        Self { topic, event }
    }

    pub fn qos(&self) -> Qos {
        self.event.qos()
    }
}
