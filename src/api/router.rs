use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use super::state::SharedState;

/// Build the Axum router with all routes and middleware.
///
/// Collection routes answer with and without the trailing slash.
pub fn create_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        // Users
        .route(
            "/users/",
            post(handlers::create_user).get(handlers::list_users),
        )
        .route(
            "/users",
            post(handlers::create_user).get(handlers::list_users),
        )
        .route("/users/{id}/register-fcm", post(handlers::register_fcm))
        .route("/subscriptions/region", post(handlers::subscribe_region))
        // Fields
        .route(
            "/fields/",
            post(handlers::create_field).get(handlers::list_fields),
        )
        .route(
            "/fields",
            post(handlers::create_field).get(handlers::list_fields),
        )
        // Matches
        .route(
            "/matches/",
            post(handlers::create_match).get(handlers::list_matches),
        )
        .route(
            "/matches",
            post(handlers::create_match).get(handlers::list_matches),
        )
        .route("/matches/{id}", get(handlers::get_match))
        .route("/matches/{id}/join", post(handlers::join_match))
        .route("/matches/{id}/leave", post(handlers::leave_match))
        // Live match lifecycle
        .route("/matches/{id}/start", post(handlers::start_match))
        .route("/matches/{id}/score", post(handlers::update_score))
        .route("/matches/{id}/finish", post(handlers::finish_match))
        .route("/matches/{id}/cancel", post(handlers::cancel_match))
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
