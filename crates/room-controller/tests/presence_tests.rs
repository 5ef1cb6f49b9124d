//! Presence state machine with paused tokio time.
//!
//! Grace windows come from `test_settings()`: 5s offline grace, 30s cleanup
//! grace.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use rc_test_utils::{TestHarness, TestRoom};
use room_controller::clock::Clock;
use room_controller::errors::RcError;
use room_controller::models::{EndRoomRequest, UserStatus};
use room_controller::services::{AnalyticsEvent, RoomBroadcast};

const ROOM: &str = "presence-room";

async fn harness_with_room() -> TestHarness {
    let h = TestHarness::new();
    h.services
        .coordinator
        .create_room(&TestRoom::new(ROOM).request())
        .await
        .unwrap();
    h
}

fn count_broadcasts(h: &TestHarness, wanted: &RoomBroadcast) -> usize {
    h.store
        .broadcasts(ROOM)
        .iter()
        .filter(|b| &b.event == wanted)
        .count()
}

fn offline(user: &str) -> RoomBroadcast {
    RoomBroadcast::UserOffline {
        user_id: user.to_string(),
    }
}

async fn status_of(h: &TestHarness, user: &str) -> Option<UserStatus> {
    h.services
        .presence
        .get_user(ROOM, user)
        .await
        .unwrap()
        .map(|u| u.status)
}

async fn has_consumer(h: &TestHarness, user: &str) -> bool {
    h.services
        .messaging
        .consumers(ROOM)
        .await
        .unwrap()
        .contains(&user.to_string())
}

#[tokio::test(start_paused = true)]
async fn test_first_ping_announces_user() {
    let h = harness_with_room().await;

    let entry = h.services.presence.on_ping(ROOM, "alice").await.unwrap();
    assert_eq!(entry.status, UserStatus::Online);
    assert_eq!(entry.last_ping_at, h.clock.now_millis());

    let broadcasts = h.store.broadcasts(ROOM);
    let online = broadcasts.last().unwrap();
    assert_eq!(
        online.event,
        RoomBroadcast::UserOnline {
            user_id: "alice".to_string()
        }
    );
    assert_eq!(online.except_user.as_deref(), Some("alice"));
    assert_eq!(
        h.events.analytics(ROOM, "alice"),
        vec![AnalyticsEvent::UserJoined]
    );
    assert!(has_consumer(&h, "alice").await);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_ping_only_refreshes_timestamp() {
    let h = harness_with_room().await;
    h.services.presence.on_ping(ROOM, "alice").await.unwrap();
    let published = h.store.published().len();

    tokio::time::sleep(Duration::from_secs(10)).await;
    let entry = h.services.presence.on_ping(ROOM, "alice").await.unwrap();

    assert_eq!(entry.last_ping_at, h.clock.now_millis());
    assert_eq!(h.store.published().len(), published);
    assert_eq!(h.events.analytics(ROOM, "alice").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_ping_after_room_ended_is_rejected() {
    let h = harness_with_room().await;
    h.services
        .coordinator
        .end_room(&EndRoomRequest::requested(ROOM))
        .await
        .unwrap();

    let result = h.services.presence.on_ping(ROOM, "ivy").await;

    assert!(matches!(result, Err(RcError::RoomNotFound(ref r)) if r == ROOM));
    assert_eq!(status_of(&h, "ivy").await, None);
    assert!(!has_consumer(&h, "ivy").await);
    let online = RoomBroadcast::UserOnline {
        user_id: "ivy".to_string(),
    };
    assert_eq!(count_broadcasts(&h, &online), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ping_for_unknown_room_is_rejected() {
    let h = TestHarness::new();

    let result = h.services.presence.on_ping("nowhere", "ivy").await;

    assert!(matches!(result, Err(RcError::RoomNotFound(_))));
    assert!(h.services.presence.list_users("nowhere").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_goes_offline_then_releases_resources() {
    let h = harness_with_room().await;
    h.services.presence.on_ping(ROOM, "bob").await.unwrap();

    h.services
        .presence
        .on_transport_disconnected(ROOM, "bob")
        .await
        .unwrap();
    assert_eq!(status_of(&h, "bob").await, Some(UserStatus::Disconnected));
    assert_eq!(
        count_broadcasts(
            &h,
            &RoomBroadcast::UserDisconnected {
                user_id: "bob".to_string()
            }
        ),
        1
    );

    // Still inside the offline grace
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(status_of(&h, "bob").await, Some(UserStatus::Disconnected));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(status_of(&h, "bob").await, Some(UserStatus::Offline));
    assert_eq!(count_broadcasts(&h, &offline("bob")), 1);
    assert_eq!(
        h.events.analytics(ROOM, "bob"),
        vec![AnalyticsEvent::UserJoined, AnalyticsEvent::UserLeft]
    );
    assert!(has_consumer(&h, "bob").await);

    // Past the cleanup grace
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(status_of(&h, "bob").await, None);
    assert!(!has_consumer(&h, "bob").await);
}

#[tokio::test(start_paused = true)]
async fn test_ping_during_offline_grace_keeps_user_online() {
    let h = harness_with_room().await;
    h.services.presence.on_ping(ROOM, "carol").await.unwrap();
    h.services
        .presence
        .on_transport_disconnected(ROOM, "carol")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    h.services.presence.on_ping(ROOM, "carol").await.unwrap();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(status_of(&h, "carol").await, Some(UserStatus::Online));
    assert_eq!(count_broadcasts(&h, &offline("carol")), 0);
    assert!(has_consumer(&h, "carol").await);
}

#[tokio::test(start_paused = true)]
async fn test_ping_during_cleanup_grace_keeps_resources() {
    let h = harness_with_room().await;
    h.services.presence.on_ping(ROOM, "dave").await.unwrap();
    h.services
        .presence
        .on_transport_disconnected(ROOM, "dave")
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(status_of(&h, "dave").await, Some(UserStatus::Offline));

    h.services.presence.on_ping(ROOM, "dave").await.unwrap();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(status_of(&h, "dave").await, Some(UserStatus::Online));
    assert!(has_consumer(&h, "dave").await);
    assert_eq!(
        h.events.analytics(ROOM, "dave"),
        vec![
            AnalyticsEvent::UserJoined,
            AnalyticsEvent::UserLeft,
            AnalyticsEvent::UserJoined
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_repeated_disconnect_is_ignored() {
    let h = harness_with_room().await;
    h.services.presence.on_ping(ROOM, "erin").await.unwrap();

    for _ in 0..3 {
        h.services
            .presence
            .on_transport_disconnected(ROOM, "erin")
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_secs(6)).await;

    assert_eq!(
        count_broadcasts(
            &h,
            &RoomBroadcast::UserDisconnected {
                user_id: "erin".to_string()
            }
        ),
        1
    );
    assert_eq!(count_broadcasts(&h, &offline("erin")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_for_unknown_user() {
    let h = harness_with_room().await;
    let result = h
        .services
        .presence
        .on_transport_disconnected(ROOM, "nobody")
        .await;
    assert!(matches!(result, Err(RcError::UserNotFound(ref u)) if u == "nobody"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_grace_checks() {
    let h = harness_with_room().await;
    h.services.presence.on_ping(ROOM, "frank").await.unwrap();
    h.services
        .presence
        .on_transport_disconnected(ROOM, "frank")
        .await
        .unwrap();

    h.cancel.cancel();
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(status_of(&h, "frank").await, Some(UserStatus::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn test_update_user_info_last_write_wins() {
    let h = harness_with_room().await;
    h.services.presence.on_ping(ROOM, "gina").await.unwrap();

    h.services
        .presence
        .update_user_info(ROOM, "gina", true, false, serde_json::json!({"hand": "up"}))
        .await
        .unwrap();
    let entry = h
        .services
        .presence
        .update_user_info(ROOM, "gina", false, true, serde_json::json!({"hand": "down"}))
        .await
        .unwrap();

    assert!(!entry.is_admin);
    assert!(entry.is_presenter);
    assert_eq!(entry.metadata, serde_json::json!({"hand": "down"}));
    assert_eq!(entry.status, UserStatus::Online);

    let missing = h
        .services
        .presence
        .update_user_info(ROOM, "nobody", true, true, serde_json::Value::Null)
        .await;
    assert!(matches!(missing, Err(RcError::UserNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_force_offline_is_idempotent() {
    let h = harness_with_room().await;
    h.services.presence.on_ping(ROOM, "hank").await.unwrap();

    assert!(h.services.presence.force_offline(ROOM, "hank").await.unwrap());
    assert!(!h.services.presence.force_offline(ROOM, "hank").await.unwrap());
    assert_eq!(count_broadcasts(&h, &offline("hank")), 1);

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(status_of(&h, "hank").await, None);
}
