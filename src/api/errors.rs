use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::domain::Id;
use crate::service::ServiceError;

/// Structured API error that serializes to JSON.
#[derive(Debug)]
pub enum ApiError {
    UserNotFound(Id),
    FieldNotFound(Id),
    MatchNotFound(Id),
    EmailTaken(String),
    AlreadyJoined,
    NotInMatch,
    MatchFull(u32),
    InvalidState(String),
    NoFieldOwner,
    InvalidRequest(String),
    Validation(String),
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::UserNotFound(id) => (
                StatusCode::NOT_FOUND,
                "USER_NOT_FOUND",
                format!("User not found: {id}"),
            ),
            ApiError::FieldNotFound(id) => (
                StatusCode::NOT_FOUND,
                "FIELD_NOT_FOUND",
                format!("Field not found: {id}"),
            ),
            ApiError::MatchNotFound(id) => (
                StatusCode::NOT_FOUND,
                "MATCH_NOT_FOUND",
                format!("Match not found: {id}"),
            ),
            ApiError::EmailTaken(email) => (
                StatusCode::BAD_REQUEST,
                "EMAIL_TAKEN",
                format!("Email already registered: {email}"),
            ),
            ApiError::AlreadyJoined => (
                StatusCode::BAD_REQUEST,
                "ALREADY_JOINED",
                "User already joined this match".to_string(),
            ),
            ApiError::NotInMatch => (
                StatusCode::BAD_REQUEST,
                "NOT_IN_MATCH",
                "User is not in this match".to_string(),
            ),
            ApiError::MatchFull(max) => (
                StatusCode::CONFLICT,
                "MATCH_FULL",
                format!("Match is full ({max} players)"),
            ),
            ApiError::InvalidState(msg) => (StatusCode::CONFLICT, "INVALID_STATE", msg),
            ApiError::NoFieldOwner => (
                StatusCode::BAD_REQUEST,
                "NO_FIELD_OWNER",
                "Create a user before creating fields".to_string(),
            ),
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg),
            ApiError::Validation(msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", msg)
            }
            ApiError::InternalError(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
            }
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::UserNotFound(id) => ApiError::UserNotFound(id),
            ServiceError::FieldNotFound(id) => ApiError::FieldNotFound(id),
            ServiceError::MatchNotFound(id) => ApiError::MatchNotFound(id),
            ServiceError::EmailTaken(email) => ApiError::EmailTaken(email),
            ServiceError::AlreadyJoined { .. } => ApiError::AlreadyJoined,
            ServiceError::NotInMatch { .. } => ApiError::NotInMatch,
            ServiceError::MatchFull { max_players } => ApiError::MatchFull(max_players),
            ServiceError::InvalidState(state) => ApiError::InvalidState(state.to_string()),
            ServiceError::NoFieldOwner => ApiError::NoFieldOwner,
            ServiceError::InvalidInput(msg) => ApiError::Validation(msg),
            err @ (ServiceError::PasswordHash(_) | ServiceError::Storage(_)) => {
                error!("Request failed: {err}");
                ApiError::InternalError("internal server error".to_string())
            }
        }
    }
}
