//! Room, presence and duration models.
//!
//! `RoomRecord` lives in the durable store; the `*Entry` types live in the
//! shared store as JSON and drive live behaviour.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod metadata;

pub use metadata::{LockSettings, RoomFeatures, RoomMetadata};

/// Room lifecycle status in the shared store.
///
/// Monotonic: `Created → Active → Ended`, never reversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Created,
    Active,
    Ended,
}

impl RoomStatus {
    fn rank(self) -> u8 {
        match self {
            RoomStatus::Created => 0,
            RoomStatus::Active => 1,
            RoomStatus::Ended => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    #[must_use]
    pub fn can_transition_to(self, next: RoomStatus) -> bool {
        next.rank() > self.rank()
    }

    /// Label for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Created => "created",
            RoomStatus::Active => "active",
            RoomStatus::Ended => "ended",
        }
    }
}

/// Per-user connectivity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Online,
    Disconnected,
    Offline,
}

impl UserStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Disconnected => "disconnected",
            UserStatus::Offline => "offline",
        }
    }
}

/// Durable room row. Source of truth for historical and billing queries.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomRecord {
    /// Table primary key (`dbTableId` in the state entry).
    pub id: i64,
    pub room_id: String,
    pub sid: String,
    pub title: String,
    pub is_running: bool,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub joined_participants: i64,
    pub is_breakout_room: bool,
    pub parent_room_id: Option<String>,
    pub webhook_url: Option<String>,
}

/// Fields written when a room is (re)created.
#[derive(Debug, Clone)]
pub struct NewRoomRecord {
    pub room_id: String,
    pub sid: String,
    pub title: String,
    pub is_breakout_room: bool,
    pub parent_room_id: Option<String>,
    pub webhook_url: Option<String>,
}

/// Live room state in the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomStateEntry {
    pub room_id: String,
    pub sid: String,
    pub db_table_id: i64,
    /// Room sid assigned by the media engine. Webhooks carry this one.
    #[serde(default)]
    pub media_sid: String,
    pub status: RoomStatus,
    pub metadata: RoomMetadata,
    pub empty_timeout_seconds: u32,
    pub max_participants: u32,
    /// Epoch milliseconds when the entry was created.
    pub created_at: i64,
    /// Epoch milliseconds of the media engine "room started" signal.
    #[serde(default)]
    pub started_at: Option<i64>,
}

impl RoomStateEntry {
    /// Created or Active.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status != RoomStatus::Ended
    }
}

/// Per-(room, user) presence state in the shared store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStateEntry {
    pub room_id: String,
    pub user_id: String,
    pub status: UserStatus,
    /// Epoch milliseconds of the last real ping.
    pub last_ping_at: i64,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub is_presenter: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Configured duration of an Active room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationEntry {
    pub room_id: String,
    pub duration_minutes: u64,
    /// Epoch seconds when the room became Active.
    pub started_at: i64,
}

impl DurationEntry {
    /// Epoch seconds after which the room is expired.
    #[must_use]
    pub fn expires_at(&self) -> i64 {
        let minutes = i64::try_from(self.duration_minutes).unwrap_or(i64::MAX / 60);
        self.started_at.saturating_add(minutes.saturating_mul(60))
    }

    /// `now > startedAt + duration`; a room is never expired at the boundary itself.
    #[must_use]
    pub fn is_expired(&self, now_secs: i64) -> bool {
        now_secs > self.expires_at()
    }
}

/// Why a room is being ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Explicit end request from the API layer.
    Requested,
    /// Janitor: configured duration elapsed.
    DurationExpired,
    /// Janitor: no online users past the empty timeout.
    EmptyTimeout,
    /// Janitor: durable and ephemeral/media state disagree.
    Drift,
    /// Media engine reported the room finished.
    MediaRoomFinished,
}

impl EndReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::Requested => "requested",
            EndReason::DurationExpired => "duration_expired",
            EndReason::EmptyTimeout => "empty_timeout",
            EndReason::Drift => "drift",
            EndReason::MediaRoomFinished => "media_room_finished",
        }
    }
}

/// Input to `RoomCoordinator::create_room`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRoomRequest {
    pub room_id: String,
    #[serde(default)]
    pub metadata: RoomMetadata,
    #[serde(default)]
    pub empty_timeout_seconds: Option<u32>,
    #[serde(default)]
    pub max_participants: Option<u32>,
    #[serde(default)]
    pub webhook_url: Option<String>,
}

impl CreateRoomRequest {
    /// Request with default metadata.
    #[must_use]
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            metadata: RoomMetadata::default(),
            empty_timeout_seconds: None,
            max_participants: None,
            webhook_url: None,
        }
    }
}

/// Input to `RoomCoordinator::end_room`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndRoomRequest {
    pub room_id: String,
    pub reason: EndReason,
}

impl EndRoomRequest {
    #[must_use]
    pub fn requested(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            reason: EndReason::Requested,
        }
    }
}

/// Participant snapshot derived from presence state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParticipantInfo {
    pub user_id: String,
    pub status: UserStatus,
    pub is_admin: bool,
    pub is_presenter: bool,
    pub last_ping_at: i64,
}

impl From<&UserStateEntry> for ParticipantInfo {
    fn from(entry: &UserStateEntry) -> Self {
        Self {
            user_id: entry.user_id.clone(),
            status: entry.status,
            is_admin: entry.is_admin,
            is_presenter: entry.is_presenter,
            last_ping_at: entry.last_ping_at,
        }
    }
}

/// Room + participant snapshot returned by create and query paths.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveRoomInfo {
    pub room_id: String,
    pub sid: String,
    pub db_table_id: i64,
    pub title: String,
    pub status: RoomStatus,
    pub is_running: bool,
    pub created_at: DateTime<Utc>,
    pub joined_participants: i64,
    pub is_breakout_room: bool,
    pub parent_room_id: Option<String>,
    pub metadata: RoomMetadata,
    pub participants: Vec<ParticipantInfo>,
}

/// Result of `RoomCoordinator::is_room_active`.
#[derive(Debug, Clone, Serialize)]
pub struct RoomActiveStatus {
    pub is_active: bool,
    pub metadata: Option<RoomMetadata>,
    pub message: String,
}

impl RoomActiveStatus {
    pub(crate) fn inactive(message: impl Into<String>) -> Self {
        Self {
            is_active: false,
            metadata: None,
            message: message.into(),
        }
    }
}
