use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;

use super::errors::ApiError;
use super::extract::{QueryParams, ValidJson};
use super::models::*;
use super::state::SharedState;
use crate::domain::{Field, Id, MatchStatus, MatchSummary, Score};
use crate::service::{MatchDetail, MatchFilter};

// =========================================================================
// Health
// =========================================================================

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        relay: state.service.relay().backend().to_string(),
        uptime: state.start_time.elapsed().as_secs(),
    })
}

// =========================================================================
// Users
// =========================================================================

/// POST /users/
pub async fn create_user(
    State(state): State<SharedState>,
    ValidJson(req): ValidJson<CreateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state.service.create_user(req.into()).await?;
    Ok(Json(user.into()))
}

/// GET /users/
pub async fn list_users(
    State(state): State<SharedState>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let users = state.service.list_users().await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

/// POST /users/{id}/register-fcm
pub async fn register_fcm(
    State(state): State<SharedState>,
    Path(user_id): Path<Id>,
    ValidJson(req): ValidJson<RegisterFcmRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    state
        .service
        .register_fcm_token(user_id, &req.fcm_token)
        .await?;
    Ok(Json(MessageResponse::new("FCM token registered")))
}

/// POST /subscriptions/region
pub async fn subscribe_region(
    State(state): State<SharedState>,
    ValidJson(req): ValidJson<RegionSubscriptionRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ApiError> {
    let created = state
        .service
        .subscribe_region(req.user_id, &req.city)
        .await?;
    if created {
        Ok((
            StatusCode::CREATED,
            Json(MessageResponse::new(format!("Subscribed to {}", req.city))),
        ))
    } else {
        Ok((
            StatusCode::OK,
            Json(MessageResponse::new(format!(
                "Already subscribed to {}",
                req.city
            ))),
        ))
    }
}

// =========================================================================
// Fields
// =========================================================================

/// POST /fields/
pub async fn create_field(
    State(state): State<SharedState>,
    ValidJson(req): ValidJson<CreateFieldRequest>,
) -> Result<Json<Field>, ApiError> {
    Ok(Json(state.service.create_field(req.into()).await?))
}

/// GET /fields/
pub async fn list_fields(State(state): State<SharedState>) -> Result<Json<Vec<Field>>, ApiError> {
    Ok(Json(state.service.list_fields().await?))
}

// =========================================================================
// Matches
// =========================================================================

/// POST /matches/
pub async fn create_match(
    State(state): State<SharedState>,
    ValidJson(req): ValidJson<CreateMatchRequest>,
) -> Result<Json<MatchSummary>, ApiError> {
    Ok(Json(state.service.create_match(req.into()).await?))
}

/// GET /matches/?city=&status=
pub async fn list_matches(
    State(state): State<SharedState>,
    QueryParams(query): QueryParams<ListMatchesQuery>,
) -> Result<Json<Vec<MatchSummary>>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<MatchStatus>)
        .transpose()
        .map_err(ApiError::Validation)?;
    let filter = MatchFilter {
        city: query.city.filter(|c| !c.trim().is_empty()),
        status,
    };
    Ok(Json(state.service.list_matches(&filter).await?))
}

/// GET /matches/{id}
pub async fn get_match(
    State(state): State<SharedState>,
    Path(match_id): Path<Id>,
) -> Result<Json<MatchDetail>, ApiError> {
    Ok(Json(state.service.get_match(match_id).await?))
}

/// POST /matches/{id}/join?user_id=
pub async fn join_match(
    State(state): State<SharedState>,
    Path(match_id): Path<Id>,
    QueryParams(query): QueryParams<UserIdQuery>,
) -> Result<Json<RosterResponse>, ApiError> {
    let change = state.service.join_match(match_id, query.user_id).await?;
    Ok(Json(RosterResponse {
        message: format!("{} joined the match", change.user_name),
        change,
    }))
}

/// POST /matches/{id}/leave?user_id=
pub async fn leave_match(
    State(state): State<SharedState>,
    Path(match_id): Path<Id>,
    QueryParams(query): QueryParams<UserIdQuery>,
) -> Result<Json<RosterResponse>, ApiError> {
    let change = state.service.leave_match(match_id, query.user_id).await?;
    Ok(Json(RosterResponse {
        message: format!("{} left the match", change.user_name),
        change,
    }))
}

/// POST /matches/{id}/start
pub async fn start_match(
    State(state): State<SharedState>,
    Path(match_id): Path<Id>,
) -> Result<Json<MatchSummary>, ApiError> {
    Ok(Json(state.service.start_match(match_id).await?))
}

/// POST /matches/{id}/score
pub async fn update_score(
    State(state): State<SharedState>,
    Path(match_id): Path<Id>,
    ValidJson(req): ValidJson<ScoreRequest>,
) -> Result<Json<MatchSummary>, ApiError> {
    let score = Score {
        home: req.home_score,
        away: req.away_score,
    };
    Ok(Json(state.service.update_score(match_id, score).await?))
}

/// POST /matches/{id}/finish
pub async fn finish_match(
    State(state): State<SharedState>,
    Path(match_id): Path<Id>,
) -> Result<Json<MatchSummary>, ApiError> {
    Ok(Json(state.service.finish_match(match_id).await?))
}

/// POST /matches/{id}/cancel
pub async fn cancel_match(
    State(state): State<SharedState>,
    Path(match_id): Path<Id>,
) -> Result<Json<MatchSummary>, ApiError> {
    Ok(Json(state.service.cancel_match(match_id).await?))
}
