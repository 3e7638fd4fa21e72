use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tungstenite::protocol::Message as WsMessage;

use super::topic::{city_matches, city_slug, match_live_updates, match_updates};
use super::*;
use crate::broker::Broker;
use crate::client::Client;
use crate::domain::{MatchStatus, Score};

fn user(id: Id, name: &str) -> User {
    User {
        id,
        name: name.to_string(),
        email: format!("{id}@futside.app"),
        hashed_password: String::new(),
        phone: None,
        fcm_token: None,
        created_at: Utc::now(),
        updated_at: None,
    }
}

fn a_match(id: Id, status: MatchStatus) -> Match {
    Match {
        id,
        creator_id: 1,
        field_id: 1,
        title: "Pelada".into(),
        description: None,
        date: NaiveDate::from_ymd_opt(2025, 6, 12).unwrap(),
        start_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        end_time: NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
        max_players: 10,
        skill_level_required: None,
        status,
        score: Score { home: 2, away: 1 },
        created_at: Utc::now(),
        updated_at: Some(Utc.with_ymd_and_hms(2025, 6, 12, 20, 0, 0).unwrap()),
    }
}

fn memory_relay() -> (EventRelay, Arc<MemoryPublisher>) {
    let publisher = Arc::new(MemoryPublisher::new());
    (EventRelay::new(publisher.clone()), publisher)
}

#[test]
fn topics_follow_the_naming_scheme() {
    assert_eq!(match_updates(123), "futside/match/123/updates");
    assert_eq!(match_live_updates(123), "futside/match/123/live_updates");
    assert_eq!(city_matches("Brasilia"), "futside/matches/brasilia");
    assert_eq!(city_matches("  Sao   Paulo "), "futside/matches/sao-paulo");
}

#[test]
fn city_slug_is_deterministic() {
    assert_eq!(city_slug("Rio de Janeiro"), city_slug("rio DE\tjaneiro"));
    assert_eq!(city_slug(""), "");
}

#[tokio::test]
async fn player_joined_matches_the_documented_example() {
    let (relay, publisher) = memory_relay();
    let joined_at = Utc.with_ymd_and_hms(2025, 6, 10, 18, 30, 0).unwrap();

    relay
        .player_joined(123, &user(4, "Jogador A"), 5, joined_at)
        .await;

    let published = publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "futside/match/123/updates");
    assert_eq!(published[0].qos, Qos::ExactlyOnce);
    assert_eq!(
        published[0].json(),
        json!({
            "event": "player_joined",
            "data": {
                "user_id": 4,
                "user_name": "Jogador A",
                "player_count": 5,
                "joined_at": "2025-06-10T18:30:00Z"
            }
        })
    );
}

#[tokio::test]
async fn live_events_go_to_live_updates() {
    let (relay, publisher) = memory_relay();
    let m = a_match(7, MatchStatus::Live);

    relay.match_started(&m).await;
    relay.score_updated(&m).await;
    relay.match_finished(&m).await;

    let published = publisher.on_topic("futside/match/7/live_updates");
    let names: Vec<_> = published.iter().map(|p| p.json()["event"].clone()).collect();
    assert_eq!(names, vec!["match_started", "score_updated", "match_finished"]);
    assert_eq!(published[1].json()["data"]["home_score"], 2);
    assert_eq!(published[2].json()["data"]["away_score"], 1);
    assert!(published.iter().all(|p| p.qos == Qos::AtLeastOnce));
}

#[tokio::test]
async fn new_match_is_published_to_the_city_topic() {
    let (relay, publisher) = memory_relay();
    let summary = MatchSummary {
        record: a_match(9, MatchStatus::Scheduled),
        city: "Sao Paulo".into(),
        player_count: 0,
    };

    relay.new_match(&summary).await;

    let published = publisher.on_topic("futside/matches/sao-paulo");
    assert_eq!(published.len(), 1);
    let payload = published[0].json();
    assert_eq!(payload["event"], "new_match");
    assert_eq!(payload["data"]["id"], 9);
    assert_eq!(payload["data"]["status"], "scheduled");
    assert_eq!(payload["data"]["city"], "Sao Paulo");
}

#[tokio::test]
async fn events_round_trip_through_the_envelope() {
    let event = MatchEvent::MatchCanceled {
        match_id: 3,
        canceled_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
    };
    let payload = event.to_payload().unwrap();
    assert!(payload.starts_with(r#"{"event":"match_canceled","data":{"match_id":3"#));
    assert_eq!(serde_json::from_str::<MatchEvent>(&payload).unwrap(), event);
}

#[tokio::test]
async fn publish_failures_are_swallowed_by_emit() {
    let (relay, publisher) = memory_relay();
    publisher.set_failing(true);

    // must not panic or propagate
    relay.player_left(1, &user(2, "B"), 0).await;
    assert!(publisher.published().is_empty());

    let direct = relay
        .publish(&Publication::new(
            match_updates(1),
            MatchEvent::PlayerLeft {
                user_id: 2,
                user_name: "B".into(),
                player_count: 0,
            },
        ))
        .await;
    assert!(matches!(direct, Err(PublishError::Unavailable(_))));
}

#[tokio::test]
async fn broker_publisher_fans_out_to_subscribers() {
    let broker = Arc::new(Mutex::new(Broker::new()));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = Client::new(tx);
    let client_id = client.id.clone();
    {
        let mut b = crate::broker::lock(&broker);
        b.register_client(client);
        b.subscribe("futside/match/5/updates", client_id);
    }
    let relay = EventRelay::new(Arc::new(BrokerPublisher::new(broker.clone())));
    assert_eq!(relay.backend(), "embedded");

    relay.player_left(5, &user(3, "C"), 4).await;

    let WsMessage::Text(text) = rx.try_recv().unwrap() else {
        panic!("Expected a text message");
    };
    let frame: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(frame["topic"], "futside/match/5/updates");
    assert_eq!(frame["qos"], 1, "the embedded broker caps QoS at 1");
    let event: serde_json::Value = serde_json::from_str(frame["payload"].as_str().unwrap()).unwrap();
    assert_eq!(event["event"], "player_left");
    assert_eq!(event["data"]["player_count"], 4);
}

#[tokio::test]
async fn disabled_relay_accepts_everything() {
    let relay = EventRelay::disabled();
    assert_eq!(relay.backend(), "disabled");
    relay.match_canceled(&a_match(1, MatchStatus::Canceled)).await;
}
