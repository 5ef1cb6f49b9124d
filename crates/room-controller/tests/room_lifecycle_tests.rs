//! Room lifecycle coordinator over in-memory backends.
//!
//! Covers idempotent creation under concurrency, best-effort teardown,
//! self-healing reads and the media engine webhook handlers.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use rc_test_utils::{test_settings, user_entry, MockMediaEngine, TestHarness, TestRoom};
use room_controller::errors::RcError;
use room_controller::models::{EndReason, EndRoomRequest, RoomStatus, UserStatus};
use room_controller::repositories::RoomRepository;
use room_controller::services::{RoomBroadcast, WebhookEvent};
use room_controller::store::{self, keys, SharedStore};

/// Let spawned tasks (webhooks) run.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ============================================================================
// CreateRoom
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_create_room_writes_all_three_stores() {
    let h = TestHarness::new();
    let room = TestRoom::new("room-a").with_max_participants(25);

    let info = h
        .services
        .coordinator
        .create_room(&room.request())
        .await
        .unwrap();

    assert_eq!(info.room_id, "room-a");
    assert_eq!(info.status, RoomStatus::Created);
    assert!(info.sid.starts_with("RM_"));
    assert!(info.is_running);

    let record = h.rooms.row("room-a").unwrap();
    assert!(record.is_running);
    assert_eq!(record.sid, info.sid);
    assert_eq!(info.db_table_id, record.id);

    let entry = h.services.coordinator.room_state("room-a").await.unwrap().unwrap();
    assert_eq!(entry.status, RoomStatus::Created);
    assert_eq!(entry.db_table_id, record.id);
    assert_eq!(entry.empty_timeout_seconds, 1800);

    let media_request = h.media.last_create_request().unwrap();
    assert_eq!(media_request.name, "room-a");
    assert_eq!(media_request.empty_timeout, 1800);
    assert_eq!(media_request.max_participants, 25);
    assert!(h.media.has_room("room-a"));

    assert_eq!(
        h.services.coordinator.active_room_ids().await.unwrap(),
        vec!["room-a".to_string()]
    );
    assert!(h.services.messaging.room_exists("room-a").await.unwrap());

    settle().await;
    assert_eq!(h.events.webhooks("room-a"), vec![WebhookEvent::RoomCreated]);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_create_is_idempotent() {
    let h = TestHarness::new();
    let request = TestRoom::new("room-b").request();

    let first = h.services.coordinator.create_room(&request).await.unwrap();
    let second = h.services.coordinator.create_room(&request).await.unwrap();

    assert_eq!(first.sid, second.sid);
    assert_eq!(first.db_table_id, second.db_table_id);
    assert_eq!(h.media.create_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_create_across_instances_yields_one_sid() {
    let h = TestHarness::build(
        test_settings(),
        MockMediaEngine::new().with_create_delay(Duration::from_millis(200)),
    );
    let peer = h.peer();
    let request = TestRoom::new("room-c").request();

    let (a, b) = tokio::join!(
        h.services.coordinator.create_room(&request),
        peer.coordinator.create_room(&request),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.sid, b.sid);
    assert_eq!(h.media.create_calls(), 1);
    assert_eq!(h.rooms.row("room-c").unwrap().sid, a.sid);
}

#[tokio::test(start_paused = true)]
async fn test_create_repairs_missing_room_stream_on_reentry() {
    let h = TestHarness::new();
    let request = TestRoom::new("room-d").request();

    let first = h.services.coordinator.create_room(&request).await.unwrap();
    h.services.messaging.delete_room("room-d").await.unwrap();
    assert!(!h.services.messaging.room_exists("room-d").await.unwrap());

    let second = h.services.coordinator.create_room(&request).await.unwrap();
    assert_eq!(first.sid, second.sid);
    assert!(h.services.messaging.room_exists("room-d").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_media_failure_discards_state_and_retry_repairs() {
    let h = TestHarness::new();
    let request = TestRoom::new("room-e").request();

    h.media.set_fail_create(true);
    let result = h.services.coordinator.create_room(&request).await;
    assert!(matches!(result, Err(RcError::MediaEngine(_))));

    // The durable row is left for the retry to reuse
    let stale = h.rooms.row("room-e").unwrap();
    assert!(stale.is_running);
    assert!(h.services.coordinator.room_state("room-e").await.unwrap().is_none());
    assert!(h.services.coordinator.active_room_ids().await.unwrap().is_empty());

    // The creation lock was released on the error path
    h.media.set_fail_create(false);
    let info = h.services.coordinator.create_room(&request).await.unwrap();
    assert_ne!(info.sid, stale.sid);
    assert_eq!(info.db_table_id, stale.id);
    assert!(h.media.has_room("room-e"));
}

#[tokio::test(start_paused = true)]
async fn test_breakout_room_policy_applied_on_create() {
    let h = TestHarness::new();
    let room = TestRoom::new("room-f-breakout").breakout_of("room-f");

    let info = h
        .services
        .coordinator
        .create_room(&room.request())
        .await
        .unwrap();

    assert!(info.is_breakout_room);
    assert_eq!(info.parent_room_id.as_deref(), Some("room-f"));
    assert!(!info.metadata.features.allow_recording);
    assert!(!info.metadata.features.allow_breakout_rooms);
}

// ============================================================================
// EndRoom
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_end_room_without_record_is_not_found() {
    let h = TestHarness::new();

    let result = h
        .services
        .coordinator
        .end_room(&EndRoomRequest::requested("nope"))
        .await;

    assert!(matches!(result, Err(RcError::RoomNotFound(ref r)) if r == "nope"));
    assert!(h.media.deleted_rooms().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_end_room_tears_everything_down() {
    let h = TestHarness::new();
    let room = TestRoom::new("room-g").with_duration_minutes(30);
    h.services.coordinator.create_room(&room.request()).await.unwrap();
    h.services.coordinator.on_room_started("room-g", &h.media.sid_of("room-g")).await.unwrap();
    h.services.presence.on_ping("room-g", "alice").await.unwrap();
    assert!(h.services.durations.get("room-g").await.unwrap().is_some());

    h.services
        .coordinator
        .end_room(&EndRoomRequest::requested("room-g"))
        .await
        .unwrap();

    let last = h.store.broadcasts("room-g").pop().unwrap();
    assert_eq!(
        last.event,
        RoomBroadcast::SessionEnding {
            reason: EndReason::Requested
        }
    );
    assert_eq!(last.except_user, None);

    let entry = h.services.coordinator.room_state("room-g").await.unwrap().unwrap();
    assert_eq!(entry.status, RoomStatus::Ended);
    assert_eq!(
        h.store.ttl_of(&keys::room_state("room-g")),
        Some(test_settings().rooms.ended_room_retention)
    );

    let record = h.rooms.row("room-g").unwrap();
    assert!(!record.is_running);
    assert!(record.ended_at.is_some());

    assert_eq!(h.media.deleted_rooms(), vec!["room-g".to_string()]);
    assert!(h.services.durations.get("room-g").await.unwrap().is_none());
    assert!(h.services.presence.list_users("room-g").await.unwrap().is_empty());
    assert!(!h.services.messaging.room_exists("room-g").await.unwrap());
    assert!(h.services.coordinator.active_room_ids().await.unwrap().is_empty());

    settle().await;
    assert_eq!(
        h.events.webhooks("room-g"),
        vec![WebhookEvent::RoomCreated, WebhookEvent::RoomFinished]
    );

    // A second end finds nothing running
    let again = h
        .services
        .coordinator
        .end_room(&EndRoomRequest::requested("room-g"))
        .await;
    assert!(matches!(again, Err(RcError::RoomNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_end_room_stops_local_agents() {
    let h = TestHarness::new();
    h.services
        .coordinator
        .create_room(&TestRoom::new("room-g2").request())
        .await
        .unwrap();
    h.services.agents.boot("room-g2", "transcription").await.unwrap();
    h.services.agents.boot("elsewhere", "transcription").await.unwrap();

    h.services
        .coordinator
        .end_room(&EndRoomRequest::requested("room-g2"))
        .await
        .unwrap();

    assert!(!h.services.agents.is_running_locally("room-g2", "transcription").await);
    assert_eq!(
        h.agent_factory.shutdowns(),
        vec![("room-g2".to_string(), "transcription".to_string())]
    );
    assert!(!h
        .services
        .lock
        .is_locked(&keys::agent_lock("room-g2", "transcription"))
        .await
        .unwrap());
    assert!(h.services.agents.is_running_locally("elsewhere", "transcription").await);
}

#[tokio::test(start_paused = true)]
async fn test_end_room_continues_past_media_failure() {
    let h = TestHarness::new();
    let room = TestRoom::new("room-h").with_duration_minutes(10);
    h.services.coordinator.create_room(&room.request()).await.unwrap();
    h.services.coordinator.on_room_started("room-h", &h.media.sid_of("room-h")).await.unwrap();
    h.media.set_fail_delete(true);

    h.services
        .coordinator
        .end_room(&EndRoomRequest {
            room_id: "room-h".to_string(),
            reason: EndReason::Drift,
        })
        .await
        .unwrap();

    // Steps after the failed engine call still ran
    assert_eq!(h.media.deleted_rooms(), vec!["room-h".to_string()]);
    assert!(!h.rooms.row("room-h").unwrap().is_running);
    assert!(h.services.durations.get("room-h").await.unwrap().is_none());
    assert!(!h.services.messaging.room_exists("room-h").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_end_room_fails_when_store_is_down() {
    let h = TestHarness::new();
    h.services
        .coordinator
        .create_room(&TestRoom::new("room-h2").request())
        .await
        .unwrap();

    h.store.set_unavailable(true);
    let result = h
        .services
        .coordinator
        .end_room(&EndRoomRequest::requested("room-h2"))
        .await;
    assert!(matches!(result, Err(RcError::Store(_))));
    h.store.set_unavailable(false);

    assert!(h.rooms.row("room-h2").unwrap().is_running);
}

#[tokio::test(start_paused = true)]
async fn test_end_waits_for_in_flight_create() {
    let h = TestHarness::build(
        test_settings(),
        MockMediaEngine::new().with_create_delay(Duration::from_millis(500)),
    );
    let coordinator = h.services.coordinator.clone();
    let request = TestRoom::new("room-i").request();

    let create = tokio::spawn(async move { coordinator.create_room(&request).await });
    // Creation now holds the lock and sits in the media call
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.services
        .coordinator
        .end_room(&EndRoomRequest::requested("room-i"))
        .await
        .expect("end must wait for the create instead of reporting not found");

    create.await.unwrap().unwrap();
    let entry = h.services.coordinator.room_state("room-i").await.unwrap().unwrap();
    assert_eq!(entry.status, RoomStatus::Ended);
}

#[tokio::test(start_paused = true)]
async fn test_ended_state_expires_after_retention() {
    let h = TestHarness::new();
    h.services
        .coordinator
        .create_room(&TestRoom::new("room-j").request())
        .await
        .unwrap();
    h.services
        .coordinator
        .end_room(&EndRoomRequest::requested("room-j"))
        .await
        .unwrap();

    h.clock
        .advance(test_settings().rooms.ended_room_retention + Duration::from_secs(1));
    assert!(h.services.coordinator.room_state("room-j").await.unwrap().is_none());

    // A later create starts a fresh run
    let info = h
        .services
        .coordinator
        .create_room(&TestRoom::new("room-j").request())
        .await
        .unwrap();
    assert_eq!(info.status, RoomStatus::Created);
}

// ============================================================================
// Self-healing reads
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_running_record_is_healed_on_read() {
    let h = TestHarness::new();
    h.rooms.seed_running("room-k", "RM_stale");

    let status = h.services.coordinator.is_room_active("room-k").await.unwrap();
    assert!(!status.is_active);
    assert!(status.metadata.is_none());
    assert!(!h.rooms.row("room-k").unwrap().is_running);

    // The stale state is not observed twice
    let status = h.services.coordinator.is_room_active("room-k").await.unwrap();
    assert!(!status.is_active);
    let info = h.services.coordinator.get_active_room_info("room-k").await;
    assert!(matches!(info, Err(RcError::RoomNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_missing_media_room_is_healed_on_read() {
    let h = TestHarness::new();
    h.services
        .coordinator
        .create_room(&TestRoom::new("room-l").request())
        .await
        .unwrap();
    h.media.forget_room("room-l");

    let info = h.services.coordinator.get_active_room_info("room-l").await;
    assert!(matches!(info, Err(RcError::RoomNotFound(_))));
    assert!(!h.rooms.row("room-l").unwrap().is_running);

    let entry = h.services.coordinator.room_state("room-l").await.unwrap().unwrap();
    assert_eq!(entry.status, RoomStatus::Ended);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_media_engine_does_not_heal() {
    let h = TestHarness::new();
    h.services
        .coordinator
        .create_room(&TestRoom::new("room-m").request())
        .await
        .unwrap();
    h.media.set_fail_get(true);

    let status = h.services.coordinator.is_room_active("room-m").await.unwrap();
    assert!(status.is_active);
    assert!(h.rooms.row("room-m").unwrap().is_running);
}

#[tokio::test(start_paused = true)]
async fn test_active_rooms_info_skips_healed_rooms() {
    let h = TestHarness::new();
    for room_id in ["room-n1", "room-n2"] {
        h.services
            .coordinator
            .create_room(&TestRoom::new(room_id).request())
            .await
            .unwrap();
    }
    h.rooms.seed_running("room-n3", "RM_stale");

    let rooms = h.services.coordinator.get_active_rooms_info().await.unwrap();
    let ids: Vec<&str> = rooms.iter().map(|r| r.room_id.as_str()).collect();
    assert_eq!(ids, vec!["room-n1", "room-n2"]);
    assert!(!h.rooms.row("room-n3").unwrap().is_running);
}

#[tokio::test(start_paused = true)]
async fn test_room_info_lists_participants_sorted() {
    let h = TestHarness::new();
    h.services
        .coordinator
        .create_room(&TestRoom::new("room-o").request())
        .await
        .unwrap();
    for user in ["zed", "amy"] {
        h.services.presence.on_ping("room-o", user).await.unwrap();
    }
    let entry = user_entry("room-o", "mia", UserStatus::Offline, 0);
    store::hash_set_json(&h.store, &keys::room_users("room-o"), "mia", &entry)
        .await
        .unwrap();

    let info = h.services.coordinator.get_active_room_info("room-o").await.unwrap();
    let users: Vec<&str> = info.participants.iter().map(|p| p.user_id.as_str()).collect();
    assert_eq!(users, vec!["amy", "mia", "zed"]);
    assert_eq!(info.participants.get(1).unwrap().status, UserStatus::Offline);
}

// ============================================================================
// Media engine webhooks
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_room_started_activates_and_tracks_duration() {
    let h = TestHarness::new();
    let room = TestRoom::new("room-p").with_duration_minutes(45);
    h.services.coordinator.create_room(&room.request()).await.unwrap();

    h.services.coordinator.on_room_started("room-p", &h.media.sid_of("room-p")).await.unwrap();

    let entry = h.services.coordinator.room_state("room-p").await.unwrap().unwrap();
    assert_eq!(entry.status, RoomStatus::Active);
    assert!(entry.started_at.is_some());

    let duration = h.services.durations.get("room-p").await.unwrap().unwrap();
    assert_eq!(duration.duration_minutes, 45);

    // A repeated start does not restart the clock
    h.clock.advance(Duration::from_secs(120));
    h.services.coordinator.on_room_started("room-p", &h.media.sid_of("room-p")).await.unwrap();
    assert_eq!(
        h.services.durations.get("room-p").await.unwrap().unwrap(),
        duration
    );
}

#[tokio::test(start_paused = true)]
async fn test_room_started_for_unknown_room_is_not_found() {
    let h = TestHarness::new();
    let result = h.services.coordinator.on_room_started("ghost", "MR_ghost").await;
    assert!(matches!(result, Err(RcError::RoomNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_room_finished_ends_without_calling_engine_back() {
    let h = TestHarness::new();
    h.services
        .coordinator
        .create_room(&TestRoom::new("room-q").request())
        .await
        .unwrap();

    let media_sid = h.media.sid_of("room-q");

    h.services.coordinator.on_room_finished("room-q", &media_sid).await.unwrap();
    assert!(!h.rooms.row("room-q").unwrap().is_running);
    assert!(h.media.deleted_rooms().is_empty());

    // Late duplicate webhook
    h.services.coordinator.on_room_finished("room-q", &media_sid).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_room_finished_from_earlier_run_is_ignored() {
    let h = TestHarness::new();
    let room = TestRoom::new("room-u");
    h.services.coordinator.create_room(&room.request()).await.unwrap();
    let first_sid = h.media.sid_of("room-u");
    h.services.coordinator.on_room_started("room-u", &first_sid).await.unwrap();
    h.services
        .coordinator
        .end_room(&EndRoomRequest::requested("room-u"))
        .await
        .unwrap();

    let info = h.services.coordinator.create_room(&room.request()).await.unwrap();
    let second_sid = h.media.sid_of("room-u");
    assert_ne!(first_sid, second_sid);

    // Delivered late, after the room came back
    h.services.coordinator.on_room_finished("room-u", &first_sid).await.unwrap();

    assert!(h.rooms.row("room-u").unwrap().is_running);
    let entry = h.services.coordinator.room_state("room-u").await.unwrap().unwrap();
    assert_eq!(entry.sid, info.sid);
    assert_eq!(entry.status, RoomStatus::Created);
    assert!(h.media.has_room("room-u"));
    assert!(h.services.coordinator.is_room_active("room-u").await.unwrap().is_active);

    // The current run's own event still ends it
    h.services.coordinator.on_room_finished("room-u", &second_sid).await.unwrap();
    assert!(!h.rooms.row("room-u").unwrap().is_running);
}

#[tokio::test(start_paused = true)]
async fn test_room_started_from_earlier_run_is_ignored() {
    let h = TestHarness::new();
    let room = TestRoom::new("room-v").with_duration_minutes(20);
    h.services.coordinator.create_room(&room.request()).await.unwrap();
    let first_sid = h.media.sid_of("room-v");
    h.services
        .coordinator
        .end_room(&EndRoomRequest::requested("room-v"))
        .await
        .unwrap();
    h.services.coordinator.create_room(&room.request()).await.unwrap();

    h.services.coordinator.on_room_started("room-v", &first_sid).await.unwrap();

    let entry = h.services.coordinator.room_state("room-v").await.unwrap().unwrap();
    assert_eq!(entry.status, RoomStatus::Created);
    assert!(entry.started_at.is_none());
    assert!(h.services.durations.get("room-v").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_room_started_after_end_keeps_room_ended() {
    let h = TestHarness::new();
    let room = TestRoom::new("room-w").with_duration_minutes(20);
    h.services.coordinator.create_room(&room.request()).await.unwrap();
    let media_sid = h.media.sid_of("room-w");
    h.services
        .coordinator
        .end_room(&EndRoomRequest::requested("room-w"))
        .await
        .unwrap();

    h.services.coordinator.on_room_started("room-w", &media_sid).await.unwrap();

    let entry = h.services.coordinator.room_state("room-w").await.unwrap().unwrap();
    assert_eq!(entry.status, RoomStatus::Ended);
    assert_eq!(
        h.store.ttl_of(&keys::room_state("room-w")),
        Some(test_settings().rooms.ended_room_retention)
    );
    assert!(h.services.durations.get("room-w").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_room_started_skipped_once_record_stopped_running() {
    let h = TestHarness::new();
    let room = TestRoom::new("room-x").with_duration_minutes(20);
    h.services.coordinator.create_room(&room.request()).await.unwrap();
    let media_sid = h.media.sid_of("room-x");
    // An end that has reached the durable record but not yet the state entry
    h.rooms.mark_ended("room-x").await.unwrap();

    h.services.coordinator.on_room_started("room-x", &media_sid).await.unwrap();

    let entry = h.services.coordinator.room_state("room-x").await.unwrap().unwrap();
    assert_ne!(entry.status, RoomStatus::Active);
    assert!(h.services.durations.get("room-x").await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_room_started_waits_for_in_flight_create() {
    let h = TestHarness::build(
        test_settings(),
        MockMediaEngine::new().with_create_delay(Duration::from_millis(500)),
    );
    let coordinator = h.services.coordinator.clone();
    let request = TestRoom::new("room-y").request();

    let create = tokio::spawn(async move { coordinator.create_room(&request).await });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // The engine numbers its rooms from one
    h.services.coordinator.on_room_started("room-y", "MR_1").await.unwrap();

    create.await.unwrap().unwrap();
    let entry = h.services.coordinator.room_state("room-y").await.unwrap().unwrap();
    assert_eq!(entry.media_sid, "MR_1");
    assert_eq!(entry.status, RoomStatus::Active);
}

#[tokio::test(start_paused = true)]
async fn test_participant_counter_never_negative() {
    let h = TestHarness::new();
    h.services
        .coordinator
        .create_room(&TestRoom::new("room-r").request())
        .await
        .unwrap();

    h.services.coordinator.on_participant_joined("room-r").await.unwrap();
    h.services.coordinator.on_participant_joined("room-r").await.unwrap();
    h.services.coordinator.on_participant_left("room-r").await.unwrap();
    assert_eq!(h.rooms.row("room-r").unwrap().joined_participants, 1);

    h.services.coordinator.on_participant_left("room-r").await.unwrap();
    h.services.coordinator.on_participant_left("room-r").await.unwrap();
    assert_eq!(h.rooms.row("room-r").unwrap().joined_participants, 0);
}

#[tokio::test(start_paused = true)]
async fn test_duration_can_be_increased() {
    let h = TestHarness::new();
    let room = TestRoom::new("room-s").with_duration_minutes(30);
    h.services.coordinator.create_room(&room.request()).await.unwrap();
    h.services.coordinator.on_room_started("room-s", &h.media.sid_of("room-s")).await.unwrap();

    let total = h.services.durations.increase("room-s", 15).await.unwrap();
    assert_eq!(total, 45);

    let missing = h.services.durations.increase("room-none", 15).await;
    assert!(matches!(missing, Err(RcError::RoomNotFound(_))));
}

#[tokio::test(start_paused = true)]
async fn test_store_is_shared_between_instances() {
    let h = TestHarness::new();
    let peer = h.peer();
    h.services
        .coordinator
        .create_room(&TestRoom::new("room-t").request())
        .await
        .unwrap();

    let status = peer.coordinator.is_room_active("room-t").await.unwrap();
    assert!(status.is_active);
    assert!(h.store.exists(&keys::room_state("room-t")).await.unwrap());
}
