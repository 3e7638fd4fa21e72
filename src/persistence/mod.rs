//! Storage.
//!
//! `DATABASE_URL` picks the backend:
//! - `postgres://` or `postgresql://`: [`PgStore`], a PostgreSQL pool
//! - a plain path or `sled://path`: [`Store`], an embedded sled database
//!
//! Both implement [`Repository`], which is all the service layer sees.
//! [`MessageHistory`] keeps recent broker messages per topic so the embedded
//! broker can replay them to late subscribers. It always lives in sled,
//! inside the store's database when that is sled too.

pub mod history;
pub mod postgres;
pub mod repository;
pub mod store;

use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::{Id, MatchStateError};

pub use history::{MessageHistory, StoredMessage};
pub use postgres::PgStore;
pub use repository::{Repository, Seat};
pub use store::Store;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sled(#[from] sled::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("unsupported database URL '{0}', expected a path, sled:// or postgres://")]
    UnsupportedUrl(String),

    #[error("user {0} not found")]
    UserNotFound(Id),

    #[error("match {0} not found")]
    MatchNotFound(Id),

    #[error("email {0} is already registered")]
    EmailTaken(String),

    #[error("user {user_id} already joined match {match_id}")]
    AlreadyJoined { match_id: Id, user_id: Id },

    #[error("user {user_id} is not in match {match_id}")]
    NotJoined { match_id: Id, user_id: Id },

    #[error(transparent)]
    State(#[from] MatchStateError),
}

/// A parsed `DATABASE_URL`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// Directory of a sled database.
    Sled(String),
    /// Connection string handed to the PostgreSQL driver as is.
    Postgres(String),
}

impl FromStr for DatabaseUrl {
    type Err = StoreError;

    fn from_str(url: &str) -> Result<Self, Self::Err> {
        let unsupported = || StoreError::UnsupportedUrl(url.to_string());
        let url = url.trim();
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(DatabaseUrl::Postgres(url.to_string()));
        }
        let path = match url.strip_prefix("sled://") {
            Some(rest) => rest,
            None if url.contains("://") => return Err(unsupported()),
            None => url,
        };
        if path.trim().is_empty() {
            return Err(unsupported());
        }
        Ok(DatabaseUrl::Sled(path.to_string()))
    }
}

/// An open store of either kind.
#[derive(Clone, Debug)]
pub enum Database {
    Sled(Store),
    Postgres(PgStore),
}

impl Database {
    /// Open the store `url` names. PostgreSQL gets its tables created if
    /// they are missing.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        match url.parse::<DatabaseUrl>()? {
            DatabaseUrl::Sled(path) => Ok(Database::Sled(Store::open(&path)?)),
            DatabaseUrl::Postgres(url) => Ok(Database::Postgres(PgStore::connect(&url).await?)),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Database::Sled(_) => "sled",
            Database::Postgres(_) => "postgres",
        }
    }

    pub fn repository(&self) -> Arc<dyn Repository> {
        match self {
            Database::Sled(store) => Arc::new(store.clone()),
            Database::Postgres(store) => Arc::new(store.clone()),
        }
    }

    /// Replay history for the embedded broker. A sled store keeps it in its
    /// own database; with PostgreSQL it goes to a sled database at
    /// `fallback_path`.
    pub fn history(
        &self,
        fallback_path: &str,
        ttl_seconds: Option<i64>,
        max_messages_per_topic: Option<usize>,
    ) -> Result<MessageHistory, StoreError> {
        match self {
            Database::Sled(store) => Ok(store.history(ttl_seconds, max_messages_per_topic)),
            Database::Postgres(_) => Ok(MessageHistory::open(
                fallback_path,
                ttl_seconds,
                max_messages_per_topic,
            )?),
        }
    }
}

fn normalize_city(city: &str) -> String {
    city.trim().to_lowercase()
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
