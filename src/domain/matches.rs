use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Scheduled,
    Confirmed,
    Live,
    Completed,
    Canceled,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "scheduled",
            MatchStatus::Confirmed => "confirmed",
            MatchStatus::Live => "live",
            MatchStatus::Completed => "completed",
            MatchStatus::Canceled => "canceled",
        }
    }

    /// Scheduled and confirmed matches are still gathering players.
    pub fn is_lobby(&self) -> bool {
        matches!(self, MatchStatus::Scheduled | MatchStatus::Confirmed)
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scheduled" => Ok(MatchStatus::Scheduled),
            "confirmed" => Ok(MatchStatus::Confirmed),
            "live" => Ok(MatchStatus::Live),
            "completed" => Ok(MatchStatus::Completed),
            "canceled" | "cancelled" => Ok(MatchStatus::Canceled),
            other => Err(format!("unknown match status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillLevel {
    Beginner,
    Intermediate,
    Advanced,
    Professional,
}

impl SkillLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkillLevel::Beginner => "beginner",
            SkillLevel::Intermediate => "intermediate",
            SkillLevel::Advanced => "advanced",
            SkillLevel::Professional => "professional",
        }
    }
}

impl FromStr for SkillLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Ok(SkillLevel::Beginner),
            "intermediate" => Ok(SkillLevel::Intermediate),
            "advanced" => Ok(SkillLevel::Advanced),
            "professional" => Ok(SkillLevel::Professional),
            other => Err(format!("unknown skill level '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: u32,
    pub away: u32,
}

/// Rejected match state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchStateError {
    #[error("match is {status}, it can no longer be joined")]
    NotJoinable { status: MatchStatus },

    #[error("cannot {action} a match that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: MatchStatus,
    },

    #[error("match is full ({max_players} players)")]
    Full { max_players: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: Id,
    pub creator_id: Id,
    pub field_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_players: u32,
    pub skill_level_required: Option<SkillLevel>,
    pub status: MatchStatus,
    pub score: Score,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewMatch {
    pub creator_id: Id,
    pub field_id: Id,
    pub title: String,
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub max_players: u32,
    pub skill_level_required: Option<SkillLevel>,
}

impl Match {
    /// Checks that one more player fits, given the current participant count.
    pub fn ensure_joinable(&self, player_count: u32) -> Result<(), MatchStateError> {
        if !self.status.is_lobby() {
            return Err(MatchStateError::NotJoinable {
                status: self.status,
            });
        }
        if player_count >= self.max_players {
            return Err(MatchStateError::Full {
                max_players: self.max_players,
            });
        }
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), MatchStateError> {
        self.transition("start", MatchStatus::is_lobby, MatchStatus::Live, now)
    }

    pub fn finish(&mut self, now: DateTime<Utc>) -> Result<(), MatchStateError> {
        self.transition(
            "finish",
            |s| *s == MatchStatus::Live,
            MatchStatus::Completed,
            now,
        )
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), MatchStateError> {
        self.transition("cancel", MatchStatus::is_lobby, MatchStatus::Canceled, now)
    }

    pub fn set_score(&mut self, score: Score, now: DateTime<Utc>) -> Result<(), MatchStateError> {
        if self.status != MatchStatus::Live {
            return Err(MatchStateError::InvalidTransition {
                action: "score",
                status: self.status,
            });
        }
        self.score = score;
        self.updated_at = Some(now);
        Ok(())
    }

    fn transition(
        &mut self,
        action: &'static str,
        allowed: impl Fn(&MatchStatus) -> bool,
        to: MatchStatus,
        now: DateTime<Utc>,
    ) -> Result<(), MatchStateError> {
        if !allowed(&self.status) {
            return Err(MatchStateError::InvalidTransition {
                action,
                status: self.status,
            });
        }
        self.status = to;
        self.updated_at = Some(now);
        Ok(())
    }
}

/// A lifecycle step requested for a stored match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchChange {
    Start,
    Score(Score),
    Finish,
    Cancel,
}

impl MatchChange {
    pub fn apply(self, m: &mut Match, now: DateTime<Utc>) -> Result<(), MatchStateError> {
        match self {
            MatchChange::Start => m.start(now),
            MatchChange::Score(score) => m.set_score(score, now),
            MatchChange::Finish => m.finish(now),
            MatchChange::Cancel => m.cancel(now),
        }
    }
}

/// A match together with the context readers need: the city of its field
/// and the current participant count. This is the shape returned by the
/// REST API and carried by `new_match` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchSummary {
    #[serde(flatten)]
    pub record: Match,
    pub city: String,
    pub player_count: u32,
}

/// A user's seat in a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participation {
    pub match_id: Id,
    pub user_id: Id,
    pub joined_at: DateTime<Utc>,
}

/// Opt-in to push notifications about new matches in a city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionSubscription {
    pub user_id: Id,
    pub city: String,
}
