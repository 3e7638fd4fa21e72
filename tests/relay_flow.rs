//! REST requests flowing through the embedded broker to WebSocket subscribers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, Stream, StreamExt};
use futside::api::{AppState, create_router};
use futside::broker::{self, Broker, SharedBroker};
use futside::persistence::Store;
use futside::push::DisabledNotifier;
use futside::relay::{BrokerPublisher, EventRelay};
use futside::service::FutsideService;
use futside::transport::websocket::serve;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};

struct Stack {
    http: String,
    ws: String,
    broker: SharedBroker,
    client: reqwest::Client,
}

async fn start_stack() -> Stack {
    let store = Store::temporary().unwrap();
    let broker = Arc::new(Mutex::new(Broker::with_history(
        store.history(Some(3600), Some(100)),
    )));

    let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_addr = ws_listener.local_addr().unwrap();
    tokio::spawn(serve(ws_listener, broker.clone(), 16));

    let relay = EventRelay::new(Arc::new(BrokerPublisher::new(broker.clone())));
    let service = FutsideService::new(Arc::new(store), relay, Arc::new(DisabledNotifier));
    let app = create_router(AppState::new(service));

    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http_listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(http_listener, app).await.unwrap() });

    Stack {
        http: format!("http://{http_addr}"),
        ws: format!("ws://{ws_addr}"),
        broker,
        client: reqwest::Client::new(),
    }
}

impl Stack {
    async fn post(&self, path: &str, body: Value) -> Value {
        let resp = self
            .client
            .post(format!("{}{path}", self.http))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success(), "{path}: {}", resp.status());
        resp.json().await.unwrap()
    }

    async fn post_empty(&self, path: &str) -> reqwest::Response {
        self.client
            .post(format!("{}{path}", self.http))
            .send()
            .await
            .unwrap()
    }

    /// Creates an organizer, a court in Brasilia and a match there.
    async fn create_match(&self, max_players: u32) -> (u64, u64) {
        let organizer = self
            .post(
                "/users/",
                json!({"name": "Organizador", "email": "org@futside.app", "password": "s3cret-pass"}),
            )
            .await;
        let field = self
            .post(
                "/fields/",
                json!({"name": "Quadra da SQS 102", "address": "SQS 102", "city": "Brasilia", "state": "DF"}),
            )
            .await;
        let created = self
            .post(
                "/matches/",
                json!({
                    "creator_id": organizer["id"],
                    "field_id": field["id"],
                    "title": "Pelada de quinta",
                    "date": "2025-06-12",
                    "start_time": "18:00:00",
                    "end_time": "19:30:00",
                    "max_players": max_players
                }),
            )
            .await;
        (
            created["id"].as_u64().unwrap(),
            organizer["id"].as_u64().unwrap(),
        )
    }

    async fn create_player(&self, name: &str, email: &str) -> u64 {
        self.post(
            "/users/",
            json!({"name": name, "email": email, "password": "s3cret-pass"}),
        )
        .await["id"]
            .as_u64()
            .unwrap()
    }
}

async fn next_frame<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    let frame = tokio::time::timeout(Duration::from_secs(3), ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream closed")
        .unwrap();
    serde_json::from_str(frame.to_text().unwrap()).unwrap()
}

#[tokio::test]
async fn join_over_http_reaches_websocket_subscribers() {
    let stack = start_stack().await;
    let (match_id, _) = stack.create_match(10).await;
    let player = stack.create_player("Jogador A", "a@futside.app").await;

    let topic = format!("futside/match/{match_id}/updates");
    let (mut ws, _) = connect_async(stack.ws.as_str()).await.unwrap();
    let subscribe = json!({"type": "subscribe", "topic": topic});
    ws.send(WsMessage::text(subscribe.to_string())).await.unwrap();
    assert_eq!(next_frame(&mut ws).await["type"], "subscribed");

    let resp = stack
        .post_empty(&format!("/matches/{match_id}/join?user_id={player}"))
        .await;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["player_count"], 1);

    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["type"], "message");
    assert_eq!(frame["topic"], topic);
    assert_eq!(frame["qos"], 1, "the embedded broker caps QoS at 1");

    let event: Value = serde_json::from_str(frame["payload"].as_str().unwrap()).unwrap();
    assert_eq!(event["event"], "player_joined");
    assert_eq!(event["data"]["user_id"], player);
    assert_eq!(event["data"]["user_name"], "Jogador A");
    assert_eq!(event["data"]["player_count"], 1);

    let ack = json!({"type": "ack", "message_id": frame["message_id"]});
    ws.send(WsMessage::text(ack.to_string())).await.unwrap();
    for _ in 0..50 {
        if broker::lock(&stack.broker).pending_acks.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(broker::lock(&stack.broker).pending_acks.is_empty());
}

#[tokio::test]
async fn rejected_joins_publish_nothing() {
    let stack = start_stack().await;
    let (match_id, _) = stack.create_match(2).await;
    let a = stack.create_player("A", "a@futside.app").await;
    let b = stack.create_player("B", "b@futside.app").await;
    let c = stack.create_player("C", "c@futside.app").await;

    let topic = format!("futside/match/{match_id}/updates");
    let (mut ws, _) = connect_async(stack.ws.as_str()).await.unwrap();
    let subscribe = json!({"type": "subscribe", "topic": topic});
    ws.send(WsMessage::text(subscribe.to_string())).await.unwrap();
    assert_eq!(next_frame(&mut ws).await["type"], "subscribed");

    for user in [a, b] {
        let resp = stack
            .post_empty(&format!("/matches/{match_id}/join?user_id={user}"))
            .await;
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
    }
    let full = stack
        .post_empty(&format!("/matches/{match_id}/join?user_id={c}"))
        .await;
    assert_eq!(full.status(), reqwest::StatusCode::CONFLICT);
    let again = stack
        .post_empty(&format!("/matches/{match_id}/join?user_id={a}"))
        .await;
    assert_eq!(again.status(), reqwest::StatusCode::BAD_REQUEST);

    let counts: Vec<u64> = [next_frame(&mut ws).await, next_frame(&mut ws).await]
        .iter()
        .map(|frame| {
            let event: Value = serde_json::from_str(frame["payload"].as_str().unwrap()).unwrap();
            event["data"]["player_count"].as_u64().unwrap()
        })
        .collect();
    assert_eq!(counts, [1, 2]);

    let extra = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(extra.is_err(), "no event for rejected joins");
}

#[tokio::test]
async fn late_city_subscribers_get_new_match_from_history() {
    let stack = start_stack().await;
    let (match_id, organizer) = stack.create_match(10).await;

    let (mut ws, _) = connect_async(stack.ws.as_str()).await.unwrap();
    let subscribe = json!({"type": "subscribe", "topic": "futside/matches/brasilia"});
    ws.send(WsMessage::text(subscribe.to_string())).await.unwrap();
    assert_eq!(next_frame(&mut ws).await["type"], "subscribed");

    let replayed = next_frame(&mut ws).await;
    assert_eq!(replayed["type"], "message");
    let event: Value = serde_json::from_str(replayed["payload"].as_str().unwrap()).unwrap();
    assert_eq!(event["event"], "new_match");
    assert_eq!(event["data"]["id"], match_id);
    assert_eq!(event["data"]["creator_id"], organizer);
    assert_eq!(event["data"]["city"], "Brasilia");
}

#[tokio::test]
async fn subscribers_cannot_publish() {
    let stack = start_stack().await;
    let (mut ws, _) = connect_async(stack.ws.as_str()).await.unwrap();
    let publish = json!({"type": "publish", "topic": "futside/match/1/updates", "payload": {}});
    ws.send(WsMessage::text(publish.to_string())).await.unwrap();

    let reply = next_frame(&mut ws).await;
    assert_eq!(reply["type"], "error");
    assert!(broker::lock(&stack.broker).topics.is_empty());
}
