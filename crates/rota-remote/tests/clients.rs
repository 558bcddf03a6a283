//! Client behavior against mock HTTP servers.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use rota_core::ports::{
    BreakoutRoom, DeleteOutcome, MeetingError, MeetingRequest, ScheduleOutcome, TaskRequest,
};
use rota_core::{HostId, ShiftId, TaskPayload, TaskPhase};
use rota_remote::{
    DEFAULT_TIMEOUT, Delivery, MeetingClient, RemoteError, TaskQueueClient, TokenSource,
    WebhookClient,
};
use serde_json::json;
use serde_json::value::RawValue;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn meeting_request() -> MeetingRequest {
    MeetingRequest {
        topic: "Hub Mar 2, 2:00 PM".to_string(),
        start: Utc.with_ymd_and_hms(2026, 3, 2, 13, 45, 0).unwrap(),
        duration_minutes: 135,
        host: HostId::new("host-a").unwrap(),
        breakout_rooms: vec![BreakoutRoom {
            name: "Ada | Grace | 2:00 PM UTC".to_string(),
            participants: vec!["ada@example.org".to_string()],
        }],
    }
}

fn task() -> TaskRequest {
    TaskRequest {
        name: "shift-s1-start-1772460000".to_string(),
        phase: TaskPhase::Start,
        fire_at: Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap(),
        callback_url: "https://rota.example/tasks/start".to_string(),
        payload: TaskPayload {
            shift_id: ShiftId::new("s1").unwrap(),
            shift_start: None,
            shift_end: None,
        },
    }
}

fn fixed(token: &str) -> Arc<TokenSource> {
    Arc::new(TokenSource::fixed(token).unwrap())
}

#[tokio::test]
async fn create_meeting_sends_breakout_rooms() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users/host-a/meetings"))
        .and(header("authorization", "Bearer tok"))
        .and(body_partial_json(json!({
            "topic": "Hub Mar 2, 2:00 PM",
            "start_time": "2026-03-02T13:45:00Z",
            "duration": 135,
            "settings": {
                "breakout_room": {
                    "enable": true,
                    "rooms": [{"name": "Ada | Grace | 2:00 PM UTC", "participants": ["ada@example.org"]}]
                }
            }
        })))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"id": 123, "join_url": "https://meet.example/j/123"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = MeetingClient::new(&server.uri(), fixed("tok"), DEFAULT_TIMEOUT).unwrap();
    let meeting = client.create_meeting(&meeting_request()).await.unwrap();
    assert_eq!(meeting.meeting_id, "123");
    assert_eq!(meeting.join_url, "https://meet.example/j/123");
}

#[tokio::test]
async fn provider_rejection_maps_to_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"message": "Invalid host"})))
        .mount(&server)
        .await;

    let client = MeetingClient::new(&server.uri(), fixed("tok"), DEFAULT_TIMEOUT).unwrap();
    let err = client.create_meeting(&meeting_request()).await.unwrap_err();
    assert!(matches!(
        MeetingError::from(err),
        MeetingError::Rejected { status: 400, .. }
    ));
}

#[tokio::test]
async fn access_token_is_cached_between_calls() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"access_token": "t1", "expires_in": 3600})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/meetings/m1/participants"))
        .and(header("authorization", "Bearer t1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "participants": [{"id": "p1", "user_name": "Ada", "email": "ada@example.org"}]
        })))
        .expect(2)
        .mount(&server)
        .await;

    let token = Arc::new(
        TokenSource::client_credentials(format!("{}/oauth/token", server.uri()), "id", "secret")
            .unwrap(),
    );
    let client = MeetingClient::new(&server.uri(), token, DEFAULT_TIMEOUT).unwrap();
    for _ in 0..2 {
        let participants = client.list_participants("m1").await.unwrap();
        assert_eq!(participants[0].name, "Ada");
    }
}

#[tokio::test]
async fn rejected_token_is_refreshed_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "old"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access_token": "new"})))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(header("authorization", "Bearer old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/meetings/m1/participants/p1/status"))
        .and(header("authorization", "Bearer new"))
        .and(body_partial_json(json!({"action": "mute"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let token = Arc::new(
        TokenSource::client_credentials(format!("{}/oauth/token", server.uri()), "id", "secret")
            .unwrap(),
    );
    let client = MeetingClient::new(&server.uri(), token, DEFAULT_TIMEOUT).unwrap();
    client.mute_participant("m1", "p1").await.unwrap();
}

#[tokio::test]
async fn task_names_taken_count_as_scheduled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/tasks"))
        .and(body_partial_json(json!({
            "name": "shift-s1-start-1772460000",
            "schedule_time": "2026-03-02T14:00:00Z",
            "http_request": {"url": "https://rota.example/tasks/start", "body": {"shift_id": "s1"}}
        })))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/tasks/shift-s1-start-1772460000"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = TaskQueueClient::new(&server.uri(), fixed("tok"), DEFAULT_TIMEOUT).unwrap();
    assert_eq!(
        client.schedule(&task()).await.unwrap(),
        ScheduleOutcome::AlreadyExists
    );
    assert_eq!(
        client.delete("shift-s1-start-1772460000").await.unwrap(),
        DeleteOutcome::NotFound
    );
}

#[tokio::test]
async fn queue_auth_failure_is_a_configuration_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "forbidden"})))
        .mount(&server)
        .await;

    let client = TaskQueueClient::new(&server.uri(), fixed("tok"), DEFAULT_TIMEOUT).unwrap();
    let err = client.schedule(&task()).await.unwrap_err();
    assert!(matches!(err, RemoteError::Unauthorized { .. }));
}

#[tokio::test]
async fn webhook_forwards_the_event_verbatim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/rota"))
        .and(header("idempotency-key", "evt-1"))
        .and(body_partial_json(json!({
            "kind": "shift_missed",
            "event": {"type": "shift_missed", "shift_id": "s1"}
        })))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&server)
        .await;

    let client = WebhookClient::new(&format!("{}/hooks/rota", server.uri()), DEFAULT_TIMEOUT)
        .unwrap();
    let event = RawValue::from_string(
        r#"{"type":"shift_missed","shift_id":"s1","organizer_id":"t1"}"#.to_string(),
    )
    .unwrap();
    client
        .deliver(&Delivery {
            id: "evt-1",
            kind: "shift_missed",
            event: &event,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn webhook_failures_surface_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
        .mount(&server)
        .await;

    let client = WebhookClient::new(&server.uri(), DEFAULT_TIMEOUT).unwrap();
    let event = RawValue::from_string("{}".to_string()).unwrap();
    let err = client
        .deliver(&Delivery {
            id: "evt-2",
            kind: "shift_activated",
            event: &event,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Api { status: 503, .. }));
}
