//! Application operations behind the REST gateway.
//!
//! Every state-changing operation follows the same order: validate, persist
//! through the [`Repository`], then hand the persisted change to the
//! [`EventRelay`] and, where users opted in, to the push notifier. Nothing
//! is published for a request the store rejected.

use std::collections::HashMap;
use std::sync::Arc;

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher, SaltString};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{
    Field, Id, Match, MatchChange, MatchStateError, MatchStatus, MatchSummary, NewField,
    NewMatch, NewUser, Score, SkillLevel, User,
};
use crate::persistence::{Repository, StoreError};
use crate::push::{self, PushNotification, PushNotifier};
use crate::relay::EventRelay;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("user {0} not found")]
    UserNotFound(Id),

    #[error("field {0} not found")]
    FieldNotFound(Id),

    #[error("match {0} not found")]
    MatchNotFound(Id),

    #[error("email {0} is already registered")]
    EmailTaken(String),

    #[error("user {user_id} already joined match {match_id}")]
    AlreadyJoined { match_id: Id, user_id: Id },

    #[error("user {user_id} is not in match {match_id}")]
    NotInMatch { match_id: Id, user_id: Id },

    #[error("match is full ({max_players} players)")]
    MatchFull { max_players: u32 },

    #[error("{0}")]
    InvalidState(MatchStateError),

    #[error("no user exists to own the field, create a user first")]
    NoFieldOwner,

    #[error("{0}")]
    InvalidInput(String),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),

    #[error(transparent)]
    Storage(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserNotFound(id) => ServiceError::UserNotFound(id),
            StoreError::MatchNotFound(id) => ServiceError::MatchNotFound(id),
            StoreError::EmailTaken(email) => ServiceError::EmailTaken(email),
            StoreError::AlreadyJoined { match_id, user_id } => {
                ServiceError::AlreadyJoined { match_id, user_id }
            }
            StoreError::NotJoined { match_id, user_id } => {
                ServiceError::NotInMatch { match_id, user_id }
            }
            StoreError::State(MatchStateError::Full { max_players }) => {
                ServiceError::MatchFull { max_players }
            }
            StoreError::State(state) => ServiceError::InvalidState(state),
            other => ServiceError::Storage(other),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub password: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateField {
    pub owner_id: Option<Id>,
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct CreateMatch {
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

#[derive(Debug, Clone, Default)]
pub struct MatchFilter {
    pub city: Option<String>,
    pub status: Option<MatchStatus>,
}

/// A participant as shown in match details.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Player {
    pub user_id: Id,
    pub name: String,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchDetail {
    #[serde(flatten)]
    pub summary: MatchSummary,
    pub players: Vec<Player>,
}

/// Result of a join or leave.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RosterChange {
    pub match_id: Id,
    pub user_id: Id,
    pub user_name: String,
    pub player_count: u32,
}

#[derive(Clone)]
pub struct FutsideService {
    store: Arc<dyn Repository>,
    relay: EventRelay,
    notifier: Arc<dyn PushNotifier>,
}

impl FutsideService {
    pub fn new(
        store: Arc<dyn Repository>,
        relay: EventRelay,
        notifier: Arc<dyn PushNotifier>,
    ) -> Self {
        Self {
            store,
            relay,
            notifier,
        }
    }

    pub fn relay(&self) -> &EventRelay {
        &self.relay
    }

    // ---- users ----

    pub async fn create_user(&self, input: CreateUser) -> ServiceResult<User> {
        let hashed_password = hash_password(&input.password)?;
        let user = self
            .store
            .insert_user(
                NewUser {
                    name: input.name.trim().to_string(),
                    email: input.email.trim().to_string(),
                    hashed_password,
                    phone: input.phone,
                },
                Utc::now(),
            )
            .await?;
        info!("Created user {} ({})", user.id, user.email);
        Ok(user)
    }

    pub async fn list_users(&self) -> ServiceResult<Vec<User>> {
        Ok(self.store.users().await?)
    }

    pub async fn register_fcm_token(&self, user_id: Id, token: &str) -> ServiceResult<User> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ServiceError::InvalidInput("fcm_token must not be empty".into()));
        }
        Ok(self.store.set_fcm_token(user_id, token, Utc::now()).await?)
    }

    /// Returns `true` when the subscription is new.
    pub async fn subscribe_region(&self, user_id: Id, city: &str) -> ServiceResult<bool> {
        if city.trim().is_empty() {
            return Err(ServiceError::InvalidInput("city must not be empty".into()));
        }
        Ok(self.store.subscribe_region(user_id, city).await?)
    }

    // ---- fields ----

    pub async fn create_field(&self, input: CreateField) -> ServiceResult<Field> {
        let owner = match input.owner_id {
            Some(id) => self
                .store
                .user(id)
                .await?
                .ok_or(ServiceError::UserNotFound(id))?,
            None => self
                .store
                .first_user()
                .await?
                .ok_or(ServiceError::NoFieldOwner)?,
        };
        let field = self
            .store
            .insert_field(NewField {
                owner_id: owner.id,
                name: input.name,
                address: input.address,
                city: input.city.trim().to_string(),
                state: input.state,
                latitude: input.latitude,
                longitude: input.longitude,
            })
            .await?;
        Ok(field)
    }

    pub async fn list_fields(&self) -> ServiceResult<Vec<Field>> {
        Ok(self.store.fields().await?)
    }

    // ---- matches ----

    pub async fn create_match(&self, input: CreateMatch) -> ServiceResult<MatchSummary> {
        if input.end_time <= input.start_time {
            return Err(ServiceError::InvalidInput(
                "end_time must be after start_time".into(),
            ));
        }
        let creator = self
            .store
            .user(input.creator_id)
            .await?
            .ok_or(ServiceError::UserNotFound(input.creator_id))?;
        let field = self
            .store
            .field(input.field_id)
            .await?
            .ok_or(ServiceError::FieldNotFound(input.field_id))?;

        let m = self
            .store
            .insert_match(
                NewMatch {
                    creator_id: creator.id,
                    field_id: field.id,
                    title: input.title,
                    description: input.description,
                    date: input.date,
                    start_time: input.start_time,
                    end_time: input.end_time,
                    max_players: input.max_players,
                    skill_level_required: input.skill_level_required,
                },
                Utc::now(),
            )
            .await?;
        let summary = MatchSummary {
            record: m,
            city: field.city.clone(),
            player_count: 0,
        };

        self.relay.new_match(&summary).await;
        if let Err(e) = self.notify_region(&summary, &field, creator.id).await {
            warn!("Skipping push for new match {}: {e}", summary.record.id);
        }
        Ok(summary)
    }

    pub async fn list_matches(&self, filter: &MatchFilter) -> ServiceResult<Vec<MatchSummary>> {
        let cities: HashMap<Id, String> = self
            .store
            .fields()
            .await?
            .into_iter()
            .map(|f| (f.id, f.city))
            .collect();
        let wanted_city = filter.city.as_deref().map(|c| c.trim().to_lowercase());

        let mut out = Vec::new();
        for m in self.store.matches().await? {
            let city = cities.get(&m.field_id).cloned().unwrap_or_default();
            if wanted_city.as_ref().is_some_and(|w| *w != city.to_lowercase()) {
                continue;
            }
            if filter.status.is_some_and(|s| s != m.status) {
                continue;
            }
            let player_count = self.store.player_count(m.id).await?;
            out.push(MatchSummary {
                record: m,
                city,
                player_count,
            });
        }
        Ok(out)
    }

    pub async fn get_match(&self, match_id: Id) -> ServiceResult<MatchDetail> {
        let m = self
            .store
            .get_match(match_id)
            .await?
            .ok_or(ServiceError::MatchNotFound(match_id))?;
        let summary = self.summarize(m).await?;

        let mut players = Vec::new();
        for p in self.store.players(match_id).await? {
            let name = self
                .store
                .user(p.user_id)
                .await?
                .map(|u| u.name)
                .unwrap_or_default();
            players.push(Player {
                user_id: p.user_id,
                name,
                joined_at: p.joined_at,
            });
        }
        players.sort_by_key(|p| p.joined_at);
        Ok(MatchDetail { summary, players })
    }

    pub async fn join_match(&self, match_id: Id, user_id: Id) -> ServiceResult<RosterChange> {
        let seat = self.store.join(match_id, user_id, Utc::now()).await?;

        self.relay
            .player_joined(
                match_id,
                &seat.user,
                seat.player_count,
                seat.participation.joined_at,
            )
            .await;
        Ok(RosterChange {
            match_id,
            user_id,
            user_name: seat.user.name,
            player_count: seat.player_count,
        })
    }

    pub async fn leave_match(&self, match_id: Id, user_id: Id) -> ServiceResult<RosterChange> {
        if self.store.get_match(match_id).await?.is_none() {
            return Err(ServiceError::MatchNotFound(match_id));
        }
        let user = self
            .store
            .user(user_id)
            .await?
            .ok_or(ServiceError::UserNotFound(user_id))?;
        let player_count = self.store.leave(match_id, user_id).await?;

        self.relay.player_left(match_id, &user, player_count).await;
        Ok(RosterChange {
            match_id,
            user_id,
            user_name: user.name,
            player_count,
        })
    }

    pub async fn start_match(&self, match_id: Id) -> ServiceResult<MatchSummary> {
        let m = self.change_match(match_id, MatchChange::Start).await?;
        self.relay.match_started(&m).await;
        self.summarize(m).await
    }

    pub async fn update_score(&self, match_id: Id, score: Score) -> ServiceResult<MatchSummary> {
        let m = self.change_match(match_id, MatchChange::Score(score)).await?;
        self.relay.score_updated(&m).await;
        self.summarize(m).await
    }

    pub async fn finish_match(&self, match_id: Id) -> ServiceResult<MatchSummary> {
        let m = self.change_match(match_id, MatchChange::Finish).await?;
        self.relay.match_finished(&m).await;
        self.summarize(m).await
    }

    pub async fn cancel_match(&self, match_id: Id) -> ServiceResult<MatchSummary> {
        let m = self.change_match(match_id, MatchChange::Cancel).await?;
        self.relay.match_canceled(&m).await;
        if let Err(e) = self.notify_participants(&m).await {
            warn!("Skipping push for canceled match {}: {e}", m.id);
        }
        self.summarize(m).await
    }

    async fn change_match(&self, match_id: Id, change: MatchChange) -> ServiceResult<Match> {
        Ok(self
            .store
            .update_match(match_id, change, Utc::now())
            .await?)
    }

    async fn summarize(&self, m: Match) -> ServiceResult<MatchSummary> {
        let city = self
            .store
            .field(m.field_id)
            .await?
            .map(|f| f.city)
            .unwrap_or_default();
        let player_count = self.store.player_count(m.id).await?;
        Ok(MatchSummary {
            record: m,
            city,
            player_count,
        })
    }

    /// Push tokens of `user_ids`, skipping users without one.
    async fn push_tokens(
        &self,
        user_ids: impl IntoIterator<Item = Id>,
    ) -> ServiceResult<Vec<String>> {
        let mut tokens = Vec::new();
        for id in user_ids {
            let user = self.store.user(id).await?;
            if let Some(token) = user.as_ref().and_then(User::push_token) {
                tokens.push(token.to_string());
            }
        }
        Ok(tokens)
    }

    async fn notify_region(
        &self,
        summary: &MatchSummary,
        field: &Field,
        creator_id: Id,
    ) -> ServiceResult<()> {
        let subscribers = self.store.region_subscribers(&field.city).await?;
        let tokens = self
            .push_tokens(subscribers.into_iter().filter(|id| *id != creator_id))
            .await?;
        if tokens.is_empty() {
            debug!("No subscribers in '{}' to notify", field.city);
            return Ok(());
        }
        let notification = PushNotification::new(
            "New match in your area!",
            format!(
                "The match '{}' was created in {}. Tap to see it!",
                summary.record.title, field.city
            ),
        )
        .with_data("matchId", summary.record.id.to_string());
        push::spawn_batch(self.notifier.clone(), tokens, notification);
        Ok(())
    }

    async fn notify_participants(&self, m: &Match) -> ServiceResult<()> {
        let participants = self.store.players(m.id).await?;
        let tokens = self
            .push_tokens(participants.into_iter().map(|p| p.user_id))
            .await?;
        let notification = PushNotification::new(
            "Match canceled",
            format!("The match '{}' on {} was canceled.", m.title, m.date),
        )
        .with_data("matchId", m.id.to_string());
        push::spawn_batch(self.notifier.clone(), tokens, notification);
        Ok(())
    }
}

pub fn hash_password(password: &str) -> ServiceResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::PasswordHash(e.to_string()))
}
