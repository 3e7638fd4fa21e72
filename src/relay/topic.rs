//! Topic names. Every function here is pure, so the same match or city
//! always maps to the same topic.

use crate::domain::Id;

const MATCH_BASE: &str = "futside/match";
const REGION_BASE: &str = "futside/matches";

/// Lobby events of one match: joins, leaves, cancellation.
pub fn match_updates(match_id: Id) -> String {
    format!("{MATCH_BASE}/{match_id}/updates")
}

/// In-play events of one match: kick-off, score, final whistle.
pub fn match_live_updates(match_id: Id) -> String {
    format!("{MATCH_BASE}/{match_id}/live_updates")
}

/// New matches on fields in `city`.
pub fn city_matches(city: &str) -> String {
    format!("{REGION_BASE}/{}", city_slug(city))
}

/// Trimmed, lower-cased, whitespace runs collapsed to `-`.
pub fn city_slug(city: &str) -> String {
    city.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}
