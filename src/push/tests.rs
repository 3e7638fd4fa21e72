use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Form, Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;

use super::fcm::message_body;
use super::*;

const TEST_KEY: &str = include_str!("testdata/test_key.pem");

#[derive(Default)]
struct MockFcm {
    token_requests: AtomicUsize,
    sends: AtomicUsize,
}

async fn token(
    State(mock): State<Arc<MockFcm>>,
    Form(form): Form<HashMap<String, String>>,
) -> (StatusCode, Json<Value>) {
    mock.token_requests.fetch_add(1, Ordering::SeqCst);
    let grant_ok = form.get("grant_type").map(String::as_str)
        == Some("urn:ietf:params:oauth:grant-type:jwt-bearer");
    let has_assertion = form.get("assertion").is_some_and(|a| a.split('.').count() == 3);
    if !grant_ok || !has_assertion {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "invalid_grant" })));
    }
    (
        StatusCode::OK,
        Json(json!({ "access_token": "ya29.test", "expires_in": 3600, "token_type": "Bearer" })),
    )
}

async fn send(
    State(mock): State<Arc<MockFcm>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    mock.sends.fetch_add(1, Ordering::SeqCst);
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        == Some("Bearer ya29.test");
    if !authorized {
        return StatusCode::UNAUTHORIZED;
    }
    if body["message"]["token"] == "stale-token" {
        return StatusCode::NOT_FOUND;
    }
    StatusCode::OK
}

async fn mock_fcm() -> (String, Arc<MockFcm>) {
    let mock = Arc::new(MockFcm::default());
    let app = Router::new()
        .route("/token", post(token))
        .route("/v1/projects/{project}/messages:send", post(send))
        .with_state(mock.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    (format!("http://{addr}"), mock)
}

fn account(token_uri: String) -> ServiceAccount {
    ServiceAccount {
        project_id: "futside-test".into(),
        private_key: TEST_KEY.into(),
        client_email: "push@futside-test.iam.gserviceaccount.com".into(),
        token_uri,
    }
}

fn tokens(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

#[test]
fn blank_tokens_are_dropped() {
    assert_eq!(
        valid_tokens(&tokens(&["a", "", "  ", "b"])),
        tokens(&["a", "b"])
    );
}

#[test]
fn message_body_follows_fcm_v1_shape() {
    let notification =
        PushNotification::new("New match in your area!", "Pelada at Quadra 102").with_data("matchId", "42");
    assert_eq!(
        message_body("device-1", &notification),
        json!({
            "message": {
                "token": "device-1",
                "notification": {
                    "title": "New match in your area!",
                    "body": "Pelada at Quadra 102"
                },
                "data": { "matchId": "42" }
            }
        })
    );
}

#[test]
fn missing_or_disabled_credentials_fall_back_to_disabled() {
    let off = PushSettings {
        enabled: false,
        credentials_path: "firebase-adminsdk.json".into(),
    };
    assert_eq!(notifier_from_settings(&off).name(), "disabled");

    let missing = PushSettings {
        enabled: true,
        credentials_path: "/nonexistent/firebase-adminsdk.json".into(),
    };
    assert_eq!(notifier_from_settings(&missing).name(), "disabled");
}

#[test]
fn credentials_file_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sa.json");
    let file = json!({
        "type": "service_account",
        "project_id": "futside-test",
        "private_key": TEST_KEY,
        "client_email": "push@futside-test.iam.gserviceaccount.com"
    });
    std::fs::write(&path, file.to_string()).unwrap();

    let notifier = FcmNotifier::from_file(&path).unwrap();
    assert_eq!(notifier.project_id(), "futside-test");

    let settings = PushSettings {
        enabled: true,
        credentials_path: path.to_string_lossy().into_owned(),
    };
    assert_eq!(notifier_from_settings(&settings).name(), "fcm");
}

#[test]
fn malformed_credentials_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sa.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        FcmNotifier::from_file(&path),
        Err(PushError::Credentials(_))
    ));

    let mut bad_key = account("http://localhost/token".into());
    bad_key.private_key = "not a pem".into();
    assert!(matches!(
        FcmNotifier::from_service_account(bad_key),
        Err(PushError::Signing(_))
    ));
}

#[test]
fn assertion_is_an_rs256_jwt() {
    let notifier = FcmNotifier::from_service_account(account("http://localhost/token".into())).unwrap();
    let jwt = notifier.assertion(chrono::Utc::now()).unwrap();
    let header = jsonwebtoken::decode_header(&jwt).unwrap();
    assert_eq!(header.alg, jsonwebtoken::Algorithm::RS256);
}

#[tokio::test]
async fn disabled_notifier_sends_nothing() {
    let report = DisabledNotifier
        .send_batch(&tokens(&["a"]), &PushNotification::new("t", "b"))
        .await
        .unwrap();
    assert_eq!(report, BatchResponse::default());
}

#[tokio::test]
async fn batch_reports_failed_tokens_and_reuses_access_token() {
    let (base, mock) = mock_fcm().await;
    let notifier = FcmNotifier::from_service_account(account(format!("{base}/token")))
        .unwrap()
        .with_endpoint(base.clone());
    let notification = PushNotification::new("Match canceled", "Pelada was canceled");

    let report = notifier
        .send_batch(&tokens(&["device-1", "", "stale-token", "device-2"]), &notification)
        .await
        .unwrap();

    assert_eq!(report.success_count, 2);
    assert_eq!(report.failure_count, 1);
    assert_eq!(report.failed_tokens, tokens(&["stale-token"]));
    assert_eq!(mock.sends.load(Ordering::SeqCst), 3, "blank token never sent");

    notifier
        .send_batch(&tokens(&["device-3"]), &notification)
        .await
        .unwrap();
    assert_eq!(mock.token_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn empty_batches_do_not_authenticate() {
    let (base, mock) = mock_fcm().await;
    let notifier = FcmNotifier::from_service_account(account(format!("{base}/token")))
        .unwrap()
        .with_endpoint(base);

    let report = notifier
        .send_batch(&tokens(&["", " "]), &PushNotification::new("t", "b"))
        .await
        .unwrap();

    assert_eq!(report, BatchResponse::default());
    assert_eq!(mock.token_requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_token_exchange_is_an_auth_error() {
    let (base, _mock) = mock_fcm().await;
    let notifier = FcmNotifier::from_service_account(account(format!("{base}/missing")))
        .unwrap()
        .with_endpoint(base);

    let err = notifier
        .send_batch(&tokens(&["device-1"]), &PushNotification::new("t", "b"))
        .await
        .unwrap_err();
    assert!(matches!(err, PushError::Auth(_)));
}
