//! Core records: users, fields, matches and their participants.
//!
//! These are the values the store persists and the REST layer returns. They
//! carry no I/O; state rules for matches live on [`Match`] itself.

pub mod field;
pub mod matches;
pub mod user;

pub use field::{Field, NewField};
pub use matches::{
    Match, MatchChange, MatchStateError, MatchStatus, MatchSummary, NewMatch, Participation,
    RegionSubscription, Score, SkillLevel,
};
pub use user::{NewUser, User};

/// Store-assigned identifier shared by every entity.
pub type Id = u64;
