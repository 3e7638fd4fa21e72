//! PostgreSQL store.
//!
//! Tables are created on connect when missing (see `schema.sql`). Checked
//! writes run in a transaction that first locks the match row with
//! `FOR UPDATE`, so joins, leaves and state changes on one match queue up
//! behind each other. Email uniqueness is a unique index on `lower(email)`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::{FromRow, Postgres, Transaction};
use tracing::info;

use super::{Repository, Seat, StoreError, normalize_city, normalize_email};
use crate::domain::{
    Field, Id, Match, MatchChange, MatchStateError, MatchStatus, NewField, NewMatch, NewUser,
    Participation, Score, SkillLevel, User,
};

const SCHEMA: &str = include_str!("schema.sql");
const MAX_CONNECTIONS: u32 = 10;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and create any missing table.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let store = Self::lazy(url)?;
        sqlx::raw_sql(SCHEMA).execute(&store.pool).await?;
        info!("PostgreSQL schema ready");
        Ok(store)
    }

    /// A pool that opens its first connection when first used.
    pub fn lazy(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_lazy(url)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Ids are BIGSERIAL. An id past `i64::MAX` names no row.
fn sql_id(id: Id) -> i64 {
    i64::try_from(id).unwrap_or(-1)
}

fn narrow<T, U>(value: T, column: &str) -> Result<U, StoreError>
where
    T: TryInto<U> + Copy + std::fmt::Display,
{
    value
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("{column} {value} is out of range")))
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    name: String,
    email: String,
    hashed_password: String,
    phone: Option<String>,
    fcm_token: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, StoreError> {
        Ok(User {
            id: narrow(row.id, "user id")?,
            name: row.name,
            email: row.email,
            hashed_password: row.hashed_password,
            phone: row.phone,
            fcm_token: row.fcm_token,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct FieldRow {
    id: i64,
    owner_id: i64,
    name: String,
    address: String,
    city: String,
    state: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

impl TryFrom<FieldRow> for Field {
    type Error = StoreError;

    fn try_from(row: FieldRow) -> Result<Self, StoreError> {
        Ok(Field {
            id: narrow(row.id, "field id")?,
            owner_id: narrow(row.owner_id, "owner_id")?,
            name: row.name,
            address: row.address,
            city: row.city,
            state: row.state,
            latitude: row.latitude,
            longitude: row.longitude,
        })
    }
}

#[derive(FromRow)]
struct MatchRow {
    id: i64,
    creator_id: i64,
    field_id: i64,
    title: String,
    description: Option<String>,
    date: NaiveDate,
    start_time: NaiveTime,
    end_time: NaiveTime,
    max_players: i32,
    skill_level_required: Option<String>,
    status: String,
    home_score: i32,
    away_score: i32,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<MatchRow> for Match {
    type Error = StoreError;

    fn try_from(row: MatchRow) -> Result<Self, StoreError> {
        let skill_level_required = row
            .skill_level_required
            .as_deref()
            .map(str::parse::<SkillLevel>)
            .transpose()
            .map_err(StoreError::Corrupt)?;
        Ok(Match {
            id: narrow(row.id, "match id")?,
            creator_id: narrow(row.creator_id, "creator_id")?,
            field_id: narrow(row.field_id, "field_id")?,
            title: row.title,
            description: row.description,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            max_players: narrow(row.max_players, "max_players")?,
            skill_level_required,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            score: Score {
                home: narrow(row.home_score, "home_score")?,
                away: narrow(row.away_score, "away_score")?,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct PlayerRow {
    match_id: i64,
    user_id: i64,
    joined_at: DateTime<Utc>,
}

impl TryFrom<PlayerRow> for Participation {
    type Error = StoreError;

    fn try_from(row: PlayerRow) -> Result<Self, StoreError> {
        Ok(Participation {
            match_id: narrow(row.match_id, "match_id")?,
            user_id: narrow(row.user_id, "user_id")?,
            joined_at: row.joined_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}

/// Load a match and hold its row lock until the transaction ends.
async fn lock_match(tx: &mut Transaction<'_, Postgres>, id: Id) -> Result<Match, StoreError> {
    let row: Option<MatchRow> = sqlx::query_as("SELECT * FROM matches WHERE id = $1 FOR UPDATE")
        .bind(sql_id(id))
        .fetch_optional(&mut **tx)
        .await?;
    row.ok_or(StoreError::MatchNotFound(id))?.try_into()
}

async fn count_players(conn: &mut PgConnection, match_id: Id) -> Result<u32, StoreError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM match_players WHERE match_id = $1")
        .bind(sql_id(match_id))
        .fetch_one(conn)
        .await?;
    narrow(count, "player count")
}

#[async_trait]
impl Repository for PgStore {
    async fn insert_user(&self, new: NewUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        let email = new.email.trim().to_string();
        let row: UserRow = sqlx::query_as(
            "INSERT INTO users (name, email, hashed_password, phone, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(new.name)
        .bind(email.clone())
        .bind(new.hashed_password)
        .bind(new.phone)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::EmailTaken(email.clone())
            }
            other => other.into(),
        })?;
        row.try_into()
    }

    async fn user(&self, id: Id) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(sql_id(id))
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE lower(email) = $1")
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn users(&self) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn first_user(&self) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users ORDER BY id LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn set_fcm_token(
        &self,
        user_id: Id,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<User, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "UPDATE users SET fcm_token = $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(sql_id(user_id))
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.ok_or(StoreError::UserNotFound(user_id))?.try_into()
    }

    async fn insert_field(&self, new: NewField) -> Result<Field, StoreError> {
        let row: FieldRow = sqlx::query_as(
            "INSERT INTO fields (owner_id, name, address, city, state, latitude, longitude) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(sql_id(new.owner_id))
        .bind(new.name)
        .bind(new.address)
        .bind(new.city)
        .bind(new.state)
        .bind(new.latitude)
        .bind(new.longitude)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn field(&self, id: Id) -> Result<Option<Field>, StoreError> {
        let row: Option<FieldRow> = sqlx::query_as("SELECT * FROM fields WHERE id = $1")
            .bind(sql_id(id))
            .fetch_optional(&self.pool)
            .await?;
        row.map(Field::try_from).transpose()
    }

    async fn fields(&self) -> Result<Vec<Field>, StoreError> {
        let rows: Vec<FieldRow> = sqlx::query_as("SELECT * FROM fields ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn field_by_owner_and_name(
        &self,
        owner_id: Id,
        name: &str,
    ) -> Result<Option<Field>, StoreError> {
        let row: Option<FieldRow> = sqlx::query_as(
            "SELECT * FROM fields WHERE owner_id = $1 AND name = $2 ORDER BY id LIMIT 1",
        )
        .bind(sql_id(owner_id))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Field::try_from).transpose()
    }

    async fn insert_match(&self, new: NewMatch, now: DateTime<Utc>) -> Result<Match, StoreError> {
        let row: MatchRow = sqlx::query_as(
            "INSERT INTO matches (creator_id, field_id, title, description, date, start_time, \
             end_time, max_players, skill_level_required, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING *",
        )
        .bind(sql_id(new.creator_id))
        .bind(sql_id(new.field_id))
        .bind(new.title)
        .bind(new.description)
        .bind(new.date)
        .bind(new.start_time)
        .bind(new.end_time)
        .bind(narrow::<u32, i32>(new.max_players, "max_players")?)
        .bind(new.skill_level_required.map(|level| level.as_str()))
        .bind(MatchStatus::Scheduled.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get_match(&self, id: Id) -> Result<Option<Match>, StoreError> {
        let row: Option<MatchRow> = sqlx::query_as("SELECT * FROM matches WHERE id = $1")
            .bind(sql_id(id))
            .fetch_optional(&self.pool)
            .await?;
        row.map(Match::try_from).transpose()
    }

    async fn matches(&self) -> Result<Vec<Match>, StoreError> {
        let rows: Vec<MatchRow> = sqlx::query_as("SELECT * FROM matches ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        convert_all(rows)
    }

    async fn update_match(
        &self,
        id: Id,
        change: MatchChange,
        now: DateTime<Utc>,
    ) -> Result<Match, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut m = lock_match(&mut tx, id).await?;
        change.apply(&mut m, now)?;

        sqlx::query(
            "UPDATE matches SET status = $2, home_score = $3, away_score = $4, updated_at = $5 \
             WHERE id = $1",
        )
        .bind(sql_id(id))
        .bind(m.status.as_str())
        .bind(narrow::<u32, i32>(m.score.home, "home_score")?)
        .bind(narrow::<u32, i32>(m.score.away, "away_score")?)
        .bind(m.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(m)
    }

    async fn players(&self, match_id: Id) -> Result<Vec<Participation>, StoreError> {
        let rows: Vec<PlayerRow> = sqlx::query_as(
            "SELECT match_id, user_id, joined_at FROM match_players \
             WHERE match_id = $1 ORDER BY joined_at",
        )
        .bind(sql_id(match_id))
        .fetch_all(&self.pool)
        .await?;
        convert_all(rows)
    }

    async fn player_count(&self, match_id: Id) -> Result<u32, StoreError> {
        let mut conn = self.pool.acquire().await?;
        count_players(&mut conn, match_id).await
    }

    async fn join(
        &self,
        match_id: Id,
        user_id: Id,
        now: DateTime<Utc>,
    ) -> Result<Seat, StoreError> {
        let mut tx = self.pool.begin().await?;
        let m = lock_match(&mut tx, match_id).await?;
        let user: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(sql_id(user_id))
            .fetch_optional(&mut *tx)
            .await?;
        let user = User::try_from(user.ok_or(StoreError::UserNotFound(user_id))?)?;

        let seated: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM match_players WHERE match_id = $1 AND user_id = $2)",
        )
        .bind(sql_id(match_id))
        .bind(sql_id(user_id))
        .fetch_one(&mut *tx)
        .await?;
        if seated {
            return Err(StoreError::AlreadyJoined { match_id, user_id });
        }

        let count = count_players(&mut tx, match_id).await?;
        m.ensure_joinable(count)?;

        sqlx::query("INSERT INTO match_players (match_id, user_id, joined_at) VALUES ($1, $2, $3)")
            .bind(sql_id(match_id))
            .bind(sql_id(user_id))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(Seat {
            participation: Participation {
                match_id,
                user_id,
                joined_at: now,
            },
            user,
            player_count: count + 1,
        })
    }

    async fn leave(&self, match_id: Id, user_id: Id) -> Result<u32, StoreError> {
        let mut tx = self.pool.begin().await?;
        let m = lock_match(&mut tx, match_id).await?;
        if !m.status.is_lobby() {
            return Err(MatchStateError::InvalidTransition {
                action: "leave",
                status: m.status,
            }
            .into());
        }

        let removed = sqlx::query("DELETE FROM match_players WHERE match_id = $1 AND user_id = $2")
            .bind(sql_id(match_id))
            .bind(sql_id(user_id))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if removed == 0 {
            return Err(StoreError::NotJoined { match_id, user_id });
        }

        let remaining = count_players(&mut tx, match_id).await?;
        tx.commit().await?;
        Ok(remaining)
    }

    async fn subscribe_region(&self, user_id: Id, city: &str) -> Result<bool, StoreError> {
        if self.user(user_id).await?.is_none() {
            return Err(StoreError::UserNotFound(user_id));
        }
        let inserted = sqlx::query(
            "INSERT INTO region_subscriptions (user_id, city, city_key) VALUES ($1, $2, $3) \
             ON CONFLICT DO NOTHING",
        )
        .bind(sql_id(user_id))
        .bind(city.trim())
        .bind(normalize_city(city))
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(inserted == 1)
    }

    async fn region_subscribers(&self, city: &str) -> Result<Vec<Id>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM region_subscriptions WHERE city_key = $1 ORDER BY user_id",
        )
        .bind(normalize_city(city))
        .fetch_all(&self.pool)
        .await?;
        ids.into_iter().map(|id| narrow(id, "user_id")).collect()
    }

    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query(
            "TRUNCATE region_subscriptions, match_players, matches, fields, users \
             RESTART IDENTITY CASCADE",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        // every statement commits before it returns
        Ok(())
    }
}
