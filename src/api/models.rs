use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::domain::{Id, SkillLevel, User};
use crate::service::{CreateField, CreateMatch, CreateUser, RosterChange};

// =========================================================================
// Request types
// =========================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 6, max = 128))]
    pub password: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
}

impl From<CreateUserRequest> for CreateUser {
    fn from(req: CreateUserRequest) -> Self {
        CreateUser {
            name: req.name,
            email: req.email,
            password: req.password,
            phone: req.phone,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterFcmRequest {
    #[validate(length(min = 1, max = 4096))]
    pub fcm_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RegionSubscriptionRequest {
    pub user_id: Id,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFieldRequest {
    /// Defaults to the first registered user.
    pub owner_id: Option<Id>,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1, max = 300))]
    pub address: String,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 50))]
    pub state: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: Option<f64>,
}

impl From<CreateFieldRequest> for CreateField {
    fn from(req: CreateFieldRequest) -> Self {
        CreateField {
            owner_id: req.owner_id,
            name: req.name,
            address: req.address,
            city: req.city,
            state: req.state,
            latitude: req.latitude,
            longitude: req.longitude,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMatchRequest {
    pub creator_id: Id,
    pub field_id: Id,
    #[validate(length(min = 1, max = 120))]
    pub title: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[validate(range(min = 2, max = 50))]
    pub max_players: u32,
    pub skill_level_required: Option<SkillLevel>,
}

impl From<CreateMatchRequest> for CreateMatch {
    fn from(req: CreateMatchRequest) -> Self {
        CreateMatch {
            creator_id: req.creator_id,
            field_id: req.field_id,
            title: req.title,
            description: req.description,
            date: req.date,
            start_time: req.start_time,
            end_time: req.end_time,
            max_players: req.max_players,
            skill_level_required: req.skill_level_required,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct ScoreRequest {
    #[validate(range(max = 99))]
    pub home_score: u32,
    #[validate(range(max = 99))]
    pub away_score: u32,
}

/// Query parameters for `GET /matches/`.
#[derive(Debug, Deserialize, Default)]
pub struct ListMatchesQuery {
    pub city: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserIdQuery {
    pub user_id: Id,
}

// =========================================================================
// Response types
// =========================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub relay: String,
    pub uptime: u64,
}

/// A user without credentials.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Id,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub fcm_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            phone: user.phone,
            fcm_token: user.fcm_token,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        MessageResponse {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RosterResponse {
    pub message: String,
    #[serde(flatten)]
    pub change: RosterChange,
}
