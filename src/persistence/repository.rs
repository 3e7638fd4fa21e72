use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::StoreError;
use crate::domain::{
    Field, Id, Match, MatchChange, NewField, NewMatch, NewUser, Participation, User,
};

/// A successful join.
#[derive(Debug, Clone, PartialEq)]
pub struct Seat {
    pub participation: Participation,
    /// The user who took the seat, as read inside the join.
    pub user: User,
    /// Participants including this one.
    pub player_count: u32,
}

/// Everything the service layer persists.
///
/// Operations that check before they write (unique email, joins, leaves,
/// state changes) are atomic: two concurrent joins can never both take the
/// last seat.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Fails with [`StoreError::EmailTaken`] when the email is registered,
    /// compared case-insensitively.
    async fn insert_user(&self, new: NewUser, now: DateTime<Utc>) -> Result<User, StoreError>;
    async fn user(&self, id: Id) -> Result<Option<User>, StoreError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn users(&self) -> Result<Vec<User>, StoreError>;
    /// The oldest registered user.
    async fn first_user(&self) -> Result<Option<User>, StoreError>;
    async fn set_fcm_token(
        &self,
        user_id: Id,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError>;

    async fn insert_field(&self, new: NewField) -> Result<Field, StoreError>;
    async fn field(&self, id: Id) -> Result<Option<Field>, StoreError>;
    async fn fields(&self) -> Result<Vec<Field>, StoreError>;
    async fn field_by_owner_and_name(
        &self,
        owner_id: Id,
        name: &str,
    ) -> Result<Option<Field>, StoreError>;

    async fn insert_match(&self, new: NewMatch, now: DateTime<Utc>) -> Result<Match, StoreError>;
    async fn get_match(&self, id: Id) -> Result<Option<Match>, StoreError>;
    async fn matches(&self) -> Result<Vec<Match>, StoreError>;
    /// Persist `change` if the match's current state allows it.
    async fn update_match(
        &self,
        id: Id,
        change: MatchChange,
        now: DateTime<Utc>,
    ) -> Result<Match, StoreError>;

    async fn players(&self, match_id: Id) -> Result<Vec<Participation>, StoreError>;
    async fn player_count(&self, match_id: Id) -> Result<u32, StoreError>;
    /// Checks, in order: the match exists, the user exists, the user is not
    /// seated yet, the match is a lobby with a free seat.
    async fn join(&self, match_id: Id, user_id: Id, now: DateTime<Utc>)
    -> Result<Seat, StoreError>;
    /// Remove a player from a lobby match. Returns the remaining count.
    async fn leave(&self, match_id: Id, user_id: Id) -> Result<u32, StoreError>;

    /// Returns `false` when the user was already subscribed to `city`.
    async fn subscribe_region(&self, user_id: Id, city: &str) -> Result<bool, StoreError>;
    /// Users subscribed to `city`, compared case-insensitively.
    async fn region_subscribers(&self, city: &str) -> Result<Vec<Id>, StoreError>;

    /// Erase every record.
    async fn clear(&self) -> Result<(), StoreError>;
    /// Make every completed write durable.
    async fn flush(&self) -> Result<(), StoreError>;
}
