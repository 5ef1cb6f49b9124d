//! Media engine HTTP client against a mocked room service.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use room_controller::config::MediaEngineConfig;
use room_controller::errors::RcError;
use room_controller::services::{CreateMediaRoom, LiveKitClient, MediaEngine};
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PREFIX: &str = "/twirp/livekit.RoomService";

fn client_for(server: &MockServer) -> LiveKitClient {
    LiveKitClient::new(&MediaEngineConfig {
        url: server.uri(),
        api_key: "devkey".to_string(),
        api_secret: SecretString::from("devsecret-devsecret-devsecret-00"),
    })
    .unwrap()
}

#[tokio::test]
async fn test_create_room_posts_signed_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{PREFIX}/CreateRoom")))
        .and(header_exists("authorization"))
        .and(body_partial_json(json!({
            "name": "room01",
            "empty_timeout": 300,
            "max_participants": 50
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sid": "RM_abc",
            "name": "room01",
            "numParticipants": 0
        })))
        .expect(1)
        .mount(&server)
        .await;

    let room = client_for(&server)
        .create_room(&CreateMediaRoom {
            name: "room01".to_string(),
            empty_timeout: 300,
            max_participants: 50,
            metadata: "{}".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(room.sid, "RM_abc");
    assert_eq!(room.name, "room01");

    let requests = server.received_requests().await.unwrap();
    let auth = requests
        .first()
        .unwrap()
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(auth.starts_with("Bearer "));
}

#[tokio::test]
async fn test_get_room_filters_by_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{PREFIX}/ListRooms")))
        .and(body_partial_json(json!({"names": ["room01"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "rooms": [{"sid": "RM_abc", "name": "room01", "numParticipants": 2}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let room = client.get_room("room01").await.unwrap().unwrap();
    assert_eq!(room.num_participants, 2);
}

#[tokio::test]
async fn test_get_room_absent_from_listing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{PREFIX}/ListRooms")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rooms": []})))
        .mount(&server)
        .await;

    assert!(client_for(&server).get_room("room01").await.unwrap().is_none());
}

#[tokio::test]
async fn test_get_room_not_found_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{PREFIX}/ListRooms")))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(client_for(&server).get_room("room01").await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_unknown_room_is_ok() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{PREFIX}/DeleteRoom")))
        .and(body_partial_json(json!({"room": "room01"})))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server).delete_room("room01").await.unwrap();
}

#[tokio::test]
async fn test_list_participants() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{PREFIX}/ListParticipants")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "participants": [
                {"sid": "PA_1", "identity": "alice", "name": "Alice"},
                {"identity": "bob"}
            ]
        })))
        .mount(&server)
        .await;

    let participants = client_for(&server).list_participants("room01").await.unwrap();

    let identities: Vec<&str> = participants.iter().map(|p| p.identity.as_str()).collect();
    assert_eq!(identities, vec!["alice", "bob"]);
}

#[tokio::test]
async fn test_unauthorized_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client_for(&server).delete_room("room01").await;
    assert!(matches!(result, Err(RcError::MediaEngine(_))));
}

#[tokio::test]
async fn test_server_error_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let result = client_for(&server).get_room("room01").await;
    assert!(matches!(result, Err(RcError::MediaEngine(msg)) if msg.contains("503")));
}

#[tokio::test]
async fn test_unreachable_engine_is_an_error() {
    let server = MockServer::start().await;
    let client = client_for(&server);
    drop(server);

    let result = client.list_participants("room01").await;
    assert!(matches!(result, Err(RcError::MediaEngine(_))));
}
