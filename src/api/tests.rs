use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::{AppState, create_router};
use crate::persistence::Store;
use crate::push::DisabledNotifier;
use crate::relay::{EventRelay, MemoryPublisher};
use crate::service::FutsideService;

struct TestApp {
    router: Router,
    published: Arc<MemoryPublisher>,
}

fn test_app() -> TestApp {
    let published = Arc::new(MemoryPublisher::new());
    let service = FutsideService::new(
        Arc::new(Store::temporary().unwrap()),
        EventRelay::new(published.clone()),
        Arc::new(DisabledNotifier),
    );
    TestApp {
        router: create_router(AppState::new(service)),
        published,
    }
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

impl TestApp {
    async fn get(&self, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn post(&self, uri: &str, body: Value) -> Response<Body> {
        self.router
            .clone()
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn post_empty(&self, uri: &str) -> Response<Body> {
        self.router
            .clone()
            .oneshot(Request::post(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn create_user(&self, name: &str, email: &str) -> u64 {
        let resp = self
            .post(
                "/users/",
                json!({"name": name, "email": email, "password": "s3cret-pass"}),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        body_json(resp).await["id"].as_u64().unwrap()
    }

    async fn create_field(&self, city: &str) -> u64 {
        let resp = self
            .post(
                "/fields/",
                json!({
                    "name": "Quadra 108 Sul",
                    "address": "SQS 108",
                    "city": city,
                    "state": "DF",
                    "latitude": -15.8061,
                    "longitude": -47.8927
                }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        body_json(resp).await["id"].as_u64().unwrap()
    }

    async fn create_match(&self, creator_id: u64, field_id: u64, max_players: u32) -> u64 {
        let resp = self
            .post(
                "/matches/",
                json!({
                    "creator_id": creator_id,
                    "field_id": field_id,
                    "title": "Pelada de quarta",
                    "date": "2025-06-11",
                    "start_time": "19:00:00",
                    "end_time": "20:30:00",
                    "max_players": max_players,
                    "skill_level_required": "intermediate"
                }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        body_json(resp).await["id"].as_u64().unwrap()
    }
}

// --- Health ---

#[tokio::test]
async fn health_reports_relay_backend() {
    let app = test_app();
    let resp = app.get("/health").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["relay"], "memory");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let app = test_app();
    let resp = app.get("/nonexistent").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- Users ---

#[tokio::test]
async fn created_users_never_expose_password_hashes() {
    let app = test_app();
    app.create_user("Jogador A", "a@futside.app").await;

    let resp = app.get("/users/").await;
    assert_eq!(resp.status(), StatusCode::OK);
    let users = body_json(resp).await;
    assert_eq!(users.as_array().unwrap().len(), 1);
    assert_eq!(users[0]["email"], "a@futside.app");
    assert!(users[0].get("hashed_password").is_none());
    assert!(users[0].get("password").is_none());
}

#[tokio::test]
async fn duplicate_email_returns_400() {
    let app = test_app();
    app.create_user("Jogador A", "a@futside.app").await;
    let resp = app
        .post(
            "/users",
            json!({"name": "Outro", "email": "a@futside.app", "password": "another-pass"}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"]["code"], "EMAIL_TAKEN");
}

#[tokio::test]
async fn invalid_user_input_returns_422() {
    let app = test_app();
    let resp = app
        .post(
            "/users/",
            json!({"name": "Jogador", "email": "not-an-email", "password": "s3cret-pass"}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(resp).await["error"]["code"], "VALIDATION_ERROR");

    let resp = app.post("/users/", json!({"name": "Jogador"})).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn malformed_json_returns_400() {
    let app = test_app();
    let resp = app
        .router
        .clone()
        .oneshot(
            Request::post("/users/")
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"]["code"], "INVALID_REQUEST");
}

#[tokio::test]
async fn fcm_token_registration() {
    let app = test_app();
    let id = app.create_user("Jogador A", "a@futside.app").await;

    let resp = app
        .post(
            &format!("/users/{id}/register-fcm"),
            json!({"fcm_token": "device-token-1"}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let users = body_json(app.get("/users/").await).await;
    assert_eq!(users[0]["fcm_token"], "device-token-1");

    let resp = app
        .post("/users/999/register-fcm", json!({"fcm_token": "x"}))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"]["code"], "USER_NOT_FOUND");
}

#[tokio::test]
async fn region_subscription_is_201_then_200() {
    let app = test_app();
    let id = app.create_user("Jogador A", "a@futside.app").await;
    let body = json!({"user_id": id, "city": "Brasilia"});

    let resp = app.post("/subscriptions/region", body.clone()).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let resp = app.post("/subscriptions/region", body).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .post("/subscriptions/region", json!({"user_id": 42, "city": "Brasilia"}))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

// --- Fields ---

#[tokio::test]
async fn fields_default_to_the_first_user() {
    let app = test_app();
    let resp = app
        .post(
            "/fields/",
            json!({"name": "Quadra", "address": "SQS 108", "city": "Brasilia", "state": "DF"}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"]["code"], "NO_FIELD_OWNER");

    let owner = app.create_user("Prefeitura", "p@df.gov.br").await;
    app.create_field("Brasilia").await;

    let fields = body_json(app.get("/fields/").await).await;
    assert_eq!(fields.as_array().unwrap().len(), 1);
    assert_eq!(fields[0]["owner_id"], owner);
}

// --- Matches ---

#[tokio::test]
async fn creating_a_match_returns_its_summary() {
    let app = test_app();
    let user = app.create_user("Jogador A", "a@futside.app").await;
    let field = app.create_field("Brasilia").await;

    let resp = app
        .post(
            "/matches/",
            json!({
                "creator_id": user,
                "field_id": field,
                "title": "Pelada",
                "date": "2025-06-11",
                "start_time": "19:00:00",
                "end_time": "20:00:00",
                "max_players": 10
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK, "creation answers 200 like the other POSTs");
    let json = body_json(resp).await;
    assert_eq!(json["city"], "Brasilia");
    assert_eq!(json["player_count"], 0);
    assert_eq!(json["status"], "scheduled");

    assert_eq!(app.published.on_topic("futside/matches/brasilia").len(), 1);
}

#[tokio::test]
async fn match_creation_rejects_unknown_references() {
    let app = test_app();
    let user = app.create_user("Jogador A", "a@futside.app").await;

    let resp = app
        .post(
            "/matches/",
            json!({
                "creator_id": user,
                "field_id": 77,
                "title": "Pelada",
                "date": "2025-06-11",
                "start_time": "19:00:00",
                "end_time": "20:00:00",
                "max_players": 10
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"]["code"], "FIELD_NOT_FOUND");
    assert!(app.published.published().is_empty());
}

#[tokio::test]
async fn max_players_is_range_checked() {
    let app = test_app();
    let user = app.create_user("Jogador A", "a@futside.app").await;
    let field = app.create_field("Brasilia").await;
    let resp = app
        .post(
            "/matches/",
            json!({
                "creator_id": user,
                "field_id": field,
                "title": "Pelada",
                "date": "2025-06-11",
                "start_time": "19:00:00",
                "end_time": "20:00:00",
                "max_players": 1
            }),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn join_publishes_player_joined_and_returns_the_count() {
    let app = test_app();
    let creator = app.create_user("Organizador", "org@futside.app").await;
    let player = app.create_user("Jogador A", "a@futside.app").await;
    let field = app.create_field("Brasilia").await;
    let match_id = app.create_match(creator, field, 10).await;

    let resp = app
        .post_empty(&format!("/matches/{match_id}/join?user_id={player}"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["player_count"], 1);
    assert_eq!(json["user_name"], "Jogador A");

    let events = app
        .published
        .on_topic(&format!("futside/match/{match_id}/updates"));
    assert_eq!(events.len(), 1);
    let event = events[0].json();
    assert_eq!(event["event"], "player_joined");
    assert_eq!(event["data"]["user_id"], player);
    assert_eq!(event["data"]["player_count"], 1);

    let resp = app
        .post_empty(&format!("/matches/{match_id}/join?user_id={player}"))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"]["code"], "ALREADY_JOINED");
}

#[tokio::test]
async fn join_errors_map_to_status_codes() {
    let app = test_app();
    let creator = app.create_user("Organizador", "org@futside.app").await;
    let a = app.create_user("A", "a@futside.app").await;
    let b = app.create_user("B", "b@futside.app").await;
    let c = app.create_user("C", "c@futside.app").await;
    let field = app.create_field("Brasilia").await;
    let match_id = app.create_match(creator, field, 2).await;

    let resp = app.post_empty(&format!("/matches/999/join?user_id={a}")).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .post_empty(&format!("/matches/{match_id}/join?user_id=999"))
        .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app.post_empty(&format!("/matches/{match_id}/join")).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body_json(resp).await["error"]["code"], "VALIDATION_ERROR");
    let resp = app
        .post_empty(&format!("/matches/{match_id}/leave?user_id=abc"))
        .await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    for user in [a, b] {
        let resp = app
            .post_empty(&format!("/matches/{match_id}/join?user_id={user}"))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
    let resp = app
        .post_empty(&format!("/matches/{match_id}/join?user_id={c}"))
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["error"]["code"], "MATCH_FULL");
}

#[tokio::test]
async fn leave_requires_membership() {
    let app = test_app();
    let creator = app.create_user("Organizador", "org@futside.app").await;
    let player = app.create_user("Jogador A", "a@futside.app").await;
    let field = app.create_field("Brasilia").await;
    let match_id = app.create_match(creator, field, 10).await;

    let resp = app
        .post_empty(&format!("/matches/{match_id}/leave?user_id={player}"))
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["error"]["code"], "NOT_IN_MATCH");

    app.post_empty(&format!("/matches/{match_id}/join?user_id={player}"))
        .await;
    let resp = app
        .post_empty(&format!("/matches/{match_id}/leave?user_id={player}"))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["player_count"], 0);

    let events = app
        .published
        .on_topic(&format!("futside/match/{match_id}/updates"));
    assert_eq!(events.last().unwrap().json()["event"], "player_left");
}

#[tokio::test]
async fn match_detail_includes_players() {
    let app = test_app();
    let creator = app.create_user("Organizador", "org@futside.app").await;
    let player = app.create_user("Jogador A", "a@futside.app").await;
    let field = app.create_field("Brasilia").await;
    let match_id = app.create_match(creator, field, 10).await;
    app.post_empty(&format!("/matches/{match_id}/join?user_id={player}"))
        .await;

    let resp = app.get(&format!("/matches/{match_id}")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["player_count"], 1);
    assert_eq!(json["players"][0]["name"], "Jogador A");

    let resp = app.get("/matches/404").await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"]["code"], "MATCH_NOT_FOUND");
}

#[tokio::test]
async fn matches_filter_by_city_and_status() {
    let app = test_app();
    let creator = app.create_user("Organizador", "org@futside.app").await;
    let brasilia = app.create_field("Brasilia").await;
    let goiania = app.create_field("Goiania").await;
    let first = app.create_match(creator, brasilia, 10).await;
    app.create_match(creator, goiania, 10).await;
    app.post_empty(&format!("/matches/{first}/start")).await;

    let all = body_json(app.get("/matches/").await).await;
    assert_eq!(all.as_array().unwrap().len(), 2);

    let in_city = body_json(app.get("/matches/?city=BRASILIA").await).await;
    assert_eq!(in_city.as_array().unwrap().len(), 1);
    assert_eq!(in_city[0]["id"], first);

    let live = body_json(app.get("/matches?status=live").await).await;
    assert_eq!(live.as_array().unwrap().len(), 1);

    let resp = app.get("/matches/?status=halftime").await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn live_lifecycle_over_http() {
    let app = test_app();
    let creator = app.create_user("Organizador", "org@futside.app").await;
    let field = app.create_field("Brasilia").await;
    let match_id = app.create_match(creator, field, 10).await;

    let resp = app
        .post(
            &format!("/matches/{match_id}/score"),
            json!({"home_score": 1, "away_score": 0}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await["error"]["code"], "INVALID_STATE");

    let resp = app.post_empty(&format!("/matches/{match_id}/start")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "live");

    let resp = app
        .post(
            &format!("/matches/{match_id}/score"),
            json!({"home_score": 2, "away_score": 1}),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["score"]["home"], 2);

    let resp = app.post_empty(&format!("/matches/{match_id}/finish")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "completed");

    let live: Vec<String> = app
        .published
        .on_topic(&format!("futside/match/{match_id}/live_updates"))
        .iter()
        .map(|p| p.json()["event"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(live, ["match_started", "score_updated", "match_finished"]);
}

#[tokio::test]
async fn cancel_only_from_the_lobby() {
    let app = test_app();
    let creator = app.create_user("Organizador", "org@futside.app").await;
    let field = app.create_field("Brasilia").await;
    let match_id = app.create_match(creator, field, 10).await;

    let resp = app.post_empty(&format!("/matches/{match_id}/cancel")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["status"], "canceled");

    let resp = app.post_empty(&format!("/matches/{match_id}/cancel")).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}
