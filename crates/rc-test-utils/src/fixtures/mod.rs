//! Pre-configured test data.

use room_controller::models::{CreateRoomRequest, RoomMetadata, UserStateEntry, UserStatus};
use uuid::Uuid;

/// Room creation request builder.
#[derive(Debug, Clone)]
pub struct TestRoom {
    pub room_id: String,
    pub metadata: RoomMetadata,
    pub empty_timeout_seconds: Option<u32>,
    pub max_participants: Option<u32>,
}

impl TestRoom {
    #[must_use]
    pub fn new(room_id: impl Into<String>) -> Self {
        let room_id = room_id.into();
        let metadata = RoomMetadata {
            title: format!("Room {room_id}"),
            ..RoomMetadata::default()
        };
        Self {
            room_id,
            metadata,
            empty_timeout_seconds: None,
            max_participants: None,
        }
    }

    /// Room with a random ID.
    #[must_use]
    pub fn random() -> Self {
        Self::new(format!("room-{}", Uuid::new_v4().simple()))
    }

    #[must_use]
    pub fn with_duration_minutes(mut self, minutes: u64) -> Self {
        self.metadata.features.duration_minutes = minutes;
        self
    }

    #[must_use]
    pub fn with_empty_timeout(mut self, seconds: u32) -> Self {
        self.empty_timeout_seconds = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_max_participants(mut self, max: u32) -> Self {
        self.max_participants = Some(max);
        self
    }

    #[must_use]
    pub fn breakout_of(mut self, parent_room_id: impl Into<String>) -> Self {
        self.metadata.is_breakout_room = true;
        self.metadata.parent_room_id = Some(parent_room_id.into());
        self
    }

    #[must_use]
    pub fn request(&self) -> CreateRoomRequest {
        CreateRoomRequest {
            room_id: self.room_id.clone(),
            metadata: self.metadata.clone(),
            empty_timeout_seconds: self.empty_timeout_seconds,
            max_participants: self.max_participants,
            webhook_url: Some(format!("https://hooks.example.test/{}", self.room_id)),
        }
    }
}

/// Presence entry with default flags.
#[must_use]
pub fn user_entry(room_id: &str, user_id: &str, status: UserStatus, last_ping_at: i64) -> UserStateEntry {
    UserStateEntry {
        room_id: room_id.to_string(),
        user_id: user_id.to_string(),
        status,
        last_ping_at,
        is_admin: false,
        is_presenter: false,
        metadata: serde_json::Value::Null,
    }
}
