//! Match store.
//!
//! One sled tree per entity, keyed by big-endian ids so iteration follows
//! insertion order. Participants are keyed `match_id ++ user_id` and region
//! subscriptions `lower(city) ++ 0x00 ++ user_id`, which turns "players of a
//! match" and "subscribers of a city" into prefix scans.
//!
//! Reads go straight to sled. A new user and its email index entry are
//! written in one multi-tree transaction. Other writes that validate before
//! writing (joins, leaves, state transitions) run under `writes` so the
//! check and the write are atomic with respect to each other.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};

use super::history::MessageHistory;
use super::{DatabaseUrl, Repository, Seat, StoreError, normalize_city, normalize_email};
use crate::domain::{
    Field, Id, Match, MatchChange, MatchStateError, MatchStatus, NewField, NewMatch, NewUser,
    Participation, RegionSubscription, Score, User,
};

#[derive(Clone)]
pub struct Store {
    db: Db,
    users: Tree,
    emails: Tree,
    fields: Tree,
    matches: Tree,
    players: Tree,
    regions: Tree,
    writes: Arc<Mutex<()>>,
}

fn key(id: Id) -> [u8; 8] {
    id.to_be_bytes()
}

fn player_key(match_id: Id, user_id: Id) -> [u8; 16] {
    let mut k = [0u8; 16];
    k[..8].copy_from_slice(&key(match_id));
    k[8..].copy_from_slice(&key(user_id));
    k
}

fn city_prefix(city: &str) -> Vec<u8> {
    let mut prefix = normalize_city(city).into_bytes();
    prefix.push(0);
    prefix
}

fn region_key(city: &str, user_id: Id) -> Vec<u8> {
    let mut k = city_prefix(city);
    k.extend_from_slice(&key(user_id));
    k
}

impl Store {
    /// Open or create the store named by `url` (a path or `sled://path`).
    pub fn open(url: &str) -> Result<Self, StoreError> {
        match url.parse::<DatabaseUrl>()? {
            DatabaseUrl::Sled(path) => Self::from_db(sled::open(path)?),
            DatabaseUrl::Postgres(_) => Err(StoreError::UnsupportedUrl(url.to_string())),
        }
    }

    /// A store that is deleted when dropped.
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StoreError> {
        Ok(Self {
            users: db.open_tree("users")?,
            emails: db.open_tree("users_by_email")?,
            fields: db.open_tree("fields")?,
            matches: db.open_tree("matches")?,
            players: db.open_tree("players")?,
            regions: db.open_tree("region_subscriptions")?,
            writes: Arc::new(Mutex::new(())),
            db,
        })
    }

    /// Replay history sharing this store's database.
    pub fn history(
        &self,
        ttl_seconds: Option<i64>,
        max_messages_per_topic: Option<usize>,
    ) -> MessageHistory {
        MessageHistory::new(self.db.clone(), ttl_seconds, max_messages_per_topic)
    }

    pub async fn flush(&self) -> Result<usize, StoreError> {
        Ok(self.db.flush_async().await?)
    }

    /// Whether the email index has an entry for `email`.
    pub fn email_indexed(&self, email: &str) -> Result<bool, StoreError> {
        Ok(self.emails.contains_key(normalize_email(email))?)
    }

    /// Erase every record and all broker history.
    pub fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock();
        for tree in [
            &self.users,
            &self.emails,
            &self.fields,
            &self.matches,
            &self.players,
            &self.regions,
        ] {
            tree.clear()?;
        }
        self.history(None, None).clear()?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> Result<Id, StoreError> {
        // sled starts counting at zero; ids are positive
        Ok(self.db.generate_id()? + 1)
    }

    fn get<T: DeserializeOwned>(tree: &Tree, k: impl AsRef<[u8]>) -> Result<Option<T>, StoreError> {
        match tree.get(k)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(tree: &Tree, k: impl AsRef<[u8]>, value: &T) -> Result<(), StoreError> {
        tree.insert(k, serde_json::to_vec(value)?)?;
        Ok(())
    }

    fn all<T: DeserializeOwned>(tree: &Tree) -> Result<Vec<T>, StoreError> {
        tree.iter()
            .map(|entry| -> Result<T, StoreError> {
                let (_, raw) = entry?;
                Ok(serde_json::from_slice(&raw)?)
            })
            .collect()
    }

    // ---- users ----

    pub fn insert_user(&self, new: NewUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        let email_key = normalize_email(&new.email);
        if self.emails.contains_key(&email_key)? {
            return Err(StoreError::EmailTaken(new.email));
        }

        let user = User {
            id: self.next_id()?,
            name: new.name,
            email: new.email.trim().to_string(),
            hashed_password: new.hashed_password,
            phone: new.phone,
            fcm_token: None,
            created_at: now,
            updated_at: None,
        };
        let record = serde_json::to_vec(&user)?;
        let id = key(user.id);

        // the index check is repeated inside the transaction, which retries
        // on conflict, so two racing inserts of one email cannot both land
        let written = (&self.users, &self.emails).transaction(|(users, emails)| {
            if emails.get(email_key.as_bytes())?.is_some() {
                return Err(ConflictableTransactionError::Abort(()));
            }
            users.insert(&id[..], record.clone())?;
            emails.insert(email_key.as_bytes(), &id[..])?;
            Ok(())
        });
        match written {
            Ok(()) => Ok(user),
            Err(TransactionError::Abort(())) => Err(StoreError::EmailTaken(user.email)),
            Err(TransactionError::Storage(e)) => Err(e.into()),
        }
    }

    pub fn user(&self, id: Id) -> Result<Option<User>, StoreError> {
        Self::get(&self.users, key(id))
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        match self.emails.get(normalize_email(email))? {
            Some(raw) => {
                let id = <[u8; 8]>::try_from(raw.as_ref())
                    .map(Id::from_be_bytes)
                    .map_err(|_| {
                        StoreError::Corrupt(format!("bad id in email index for {email}"))
                    })?;
                self.user(id)
            }
            None => Ok(None),
        }
    }

    pub fn users(&self) -> Result<Vec<User>, StoreError> {
        Self::all(&self.users)
    }

    /// The oldest registered user.
    pub fn first_user(&self) -> Result<Option<User>, StoreError> {
        match self.users.first()? {
            Some((_, raw)) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn set_fcm_token(
        &self,
        user_id: Id,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let _guard = self.lock();
        let mut user = self
            .user(user_id)?
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.fcm_token = Some(token.to_string());
        user.updated_at = Some(now);
        Self::put(&self.users, key(user_id), &user)?;
        Ok(user)
    }

    // ---- fields ----

    pub fn insert_field(&self, new: NewField) -> Result<Field, StoreError> {
        let field = Field {
            id: self.next_id()?,
            owner_id: new.owner_id,
            name: new.name,
            address: new.address,
            city: new.city,
            state: new.state,
            latitude: new.latitude,
            longitude: new.longitude,
        };
        Self::put(&self.fields, key(field.id), &field)?;
        Ok(field)
    }

    pub fn field(&self, id: Id) -> Result<Option<Field>, StoreError> {
        Self::get(&self.fields, key(id))
    }

    pub fn fields(&self) -> Result<Vec<Field>, StoreError> {
        Self::all(&self.fields)
    }

    pub fn field_by_owner_and_name(
        &self,
        owner_id: Id,
        name: &str,
    ) -> Result<Option<Field>, StoreError> {
        Ok(self
            .fields()?
            .into_iter()
            .find(|f| f.owner_id == owner_id && f.name == name))
    }

    // ---- matches ----

    pub fn insert_match(&self, new: NewMatch, now: DateTime<Utc>) -> Result<Match, StoreError> {
        let m = Match {
            id: self.next_id()?,
            creator_id: new.creator_id,
            field_id: new.field_id,
            title: new.title,
            description: new.description,
            date: new.date,
            start_time: new.start_time,
            end_time: new.end_time,
            max_players: new.max_players,
            skill_level_required: new.skill_level_required,
            status: MatchStatus::Scheduled,
            score: Score::default(),
            created_at: now,
            updated_at: None,
        };
        Self::put(&self.matches, key(m.id), &m)?;
        Ok(m)
    }

    pub fn get_match(&self, id: Id) -> Result<Option<Match>, StoreError> {
        Self::get(&self.matches, key(id))
    }

    pub fn matches(&self) -> Result<Vec<Match>, StoreError> {
        Self::all(&self.matches)
    }

    /// Apply a state change to a match and persist it if `change` accepts.
    pub fn update_match(
        &self,
        id: Id,
        change: impl FnOnce(&mut Match) -> Result<(), MatchStateError>,
    ) -> Result<Match, StoreError> {
        let _guard = self.lock();
        let mut m = self.get_match(id)?.ok_or(StoreError::MatchNotFound(id))?;
        change(&mut m)?;
        Self::put(&self.matches, key(id), &m)?;
        Ok(m)
    }

    // ---- participants ----

    pub fn players(&self, match_id: Id) -> Result<Vec<Participation>, StoreError> {
        self.players
            .scan_prefix(key(match_id))
            .map(|entry| -> Result<Participation, StoreError> {
                let (_, raw) = entry?;
                Ok(serde_json::from_slice(&raw)?)
            })
            .collect()
    }

    pub fn player_count(&self, match_id: Id) -> Result<u32, StoreError> {
        let mut count = 0;
        for entry in self.players.scan_prefix(key(match_id)) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Seat `user_id` in `match_id`.
    pub fn join(&self, match_id: Id, user_id: Id, now: DateTime<Utc>) -> Result<Seat, StoreError> {
        let _guard = self.lock();
        let m = self
            .get_match(match_id)?
            .ok_or(StoreError::MatchNotFound(match_id))?;
        let user = self
            .user(user_id)?
            .ok_or(StoreError::UserNotFound(user_id))?;
        let pk = player_key(match_id, user_id);
        if self.players.contains_key(pk)? {
            return Err(StoreError::AlreadyJoined { match_id, user_id });
        }

        let count = self.player_count(match_id)?;
        m.ensure_joinable(count)?;

        let participation = Participation {
            match_id,
            user_id,
            joined_at: now,
        };
        Self::put(&self.players, pk, &participation)?;
        Ok(Seat {
            participation,
            user,
            player_count: count + 1,
        })
    }

    /// Remove `user_id` from a lobby match. Returns the remaining count.
    pub fn leave(&self, match_id: Id, user_id: Id) -> Result<u32, StoreError> {
        let _guard = self.lock();
        let m = self
            .get_match(match_id)?
            .ok_or(StoreError::MatchNotFound(match_id))?;
        if !m.status.is_lobby() {
            return Err(MatchStateError::InvalidTransition {
                action: "leave",
                status: m.status,
            }
            .into());
        }
        if self.players.remove(player_key(match_id, user_id))?.is_none() {
            return Err(StoreError::NotJoined { match_id, user_id });
        }
        self.player_count(match_id)
    }

    // ---- region subscriptions ----

    /// Returns `false` when the user was already subscribed to `city`.
    pub fn subscribe_region(&self, user_id: Id, city: &str) -> Result<bool, StoreError> {
        let _guard = self.lock();
        if self.user(user_id)?.is_none() {
            return Err(StoreError::UserNotFound(user_id));
        }
        let rk = region_key(city, user_id);
        if self.regions.contains_key(&rk)? {
            return Ok(false);
        }
        let sub = RegionSubscription {
            user_id,
            city: city.trim().to_string(),
        };
        Self::put(&self.regions, rk, &sub)?;
        Ok(true)
    }

    /// Users subscribed to `city`, compared case-insensitively.
    pub fn region_subscribers(&self, city: &str) -> Result<Vec<Id>, StoreError> {
        self.regions
            .scan_prefix(city_prefix(city))
            .map(|entry| -> Result<Id, StoreError> {
                let (_, raw) = entry?;
                let sub: RegionSubscription = serde_json::from_slice(&raw)?;
                Ok(sub.user_id)
            })
            .collect()
    }
}

#[async_trait]
impl Repository for Store {
    async fn insert_user(&self, new: NewUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        Store::insert_user(self, new, now)
    }

    async fn user(&self, id: Id) -> Result<Option<User>, StoreError> {
        Store::user(self, id)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Store::user_by_email(self, email)
    }

    async fn users(&self) -> Result<Vec<User>, StoreError> {
        Store::users(self)
    }

    async fn first_user(&self) -> Result<Option<User>, StoreError> {
        Store::first_user(self)
    }

    async fn set_fcm_token(
        &self,
        user_id: Id,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        Store::set_fcm_token(self, user_id, token, now)
    }

    async fn insert_field(&self, new: NewField) -> Result<Field, StoreError> {
        Store::insert_field(self, new)
    }

    async fn field(&self, id: Id) -> Result<Option<Field>, StoreError> {
        Store::field(self, id)
    }

    async fn fields(&self) -> Result<Vec<Field>, StoreError> {
        Store::fields(self)
    }

    async fn field_by_owner_and_name(
        &self,
        owner_id: Id,
        name: &str,
    ) -> Result<Option<Field>, StoreError> {
        Store::field_by_owner_and_name(self, owner_id, name)
    }

    async fn insert_match(&self, new: NewMatch, now: DateTime<Utc>) -> Result<Match, StoreError> {
        Store::insert_match(self, new, now)
    }

    async fn get_match(&self, id: Id) -> Result<Option<Match>, StoreError> {
        Store::get_match(self, id)
    }

    async fn matches(&self) -> Result<Vec<Match>, StoreError> {
        Store::matches(self)
    }

    async fn update_match(
        &self,
        id: Id,
        change: MatchChange,
        now: DateTime<Utc>,
    ) -> Result<Match, StoreError> {
        Store::update_match(self, id, |m| change.apply(m, now))
    }

    async fn players(&self, match_id: Id) -> Result<Vec<Participation>, StoreError> {
        Store::players(self, match_id)
    }

    async fn player_count(&self, match_id: Id) -> Result<u32, StoreError> {
        Store::player_count(self, match_id)
    }

    async fn join(
        &self,
        match_id: Id,
        user_id: Id,
        now: DateTime<Utc>,
    ) -> Result<Seat, StoreError> {
        Store::join(self, match_id, user_id, now)
    }

    async fn leave(&self, match_id: Id, user_id: Id) -> Result<u32, StoreError> {
        Store::leave(self, match_id, user_id)
    }

    async fn subscribe_region(&self, user_id: Id, city: &str) -> Result<bool, StoreError> {
        Store::subscribe_region(self, user_id, city)
    }

    async fn region_subscribers(&self, city: &str) -> Result<Vec<Id>, StoreError> {
        Store::region_subscribers(self, city)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        Store::clear(self)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        Store::flush(self).await.map(drop)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("db", &"sled::Db").finish()
    }
}
