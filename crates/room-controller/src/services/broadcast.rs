//! Room broadcast over shared store publish/subscribe.
//!
//! Every instance subscribed to a room's channel forwards the event to its
//! locally connected clients, skipping `except_user` when set.

use crate::errors::RcError;
use crate::models::EndReason;
use crate::store::{keys, SharedStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Events pushed to a room's connected clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoomBroadcast {
    /// Pre-teardown notice sent before a room ends.
    SessionEnding { reason: EndReason },
    UserOnline { user_id: String },
    /// Soft notice; the client may be reloading.
    UserDisconnected { user_id: String },
    UserOffline { user_id: String },
}

impl RoomBroadcast {
    fn label(&self) -> &'static str {
        match self {
            RoomBroadcast::SessionEnding { .. } => "session_ending",
            RoomBroadcast::UserOnline { .. } => "user_online",
            RoomBroadcast::UserDisconnected { .. } => "user_disconnected",
            RoomBroadcast::UserOffline { .. } => "user_offline",
        }
    }
}

/// Wire envelope published on `rc:events:room:{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastEnvelope {
    pub room_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub except_user: Option<String>,
    pub event: RoomBroadcast,
}

/// Publishes room events.
#[derive(Clone)]
pub struct Broadcaster {
    store: Arc<dyn SharedStore>,
}

impl Broadcaster {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Broadcast to everyone in the room.
    pub async fn to_room(&self, room_id: &str, event: RoomBroadcast) -> Result<(), RcError> {
        self.publish(room_id, None, event).await
    }

    /// Broadcast to everyone in the room except `user_id`.
    pub async fn to_room_except(
        &self,
        room_id: &str,
        user_id: &str,
        event: RoomBroadcast,
    ) -> Result<(), RcError> {
        self.publish(room_id, Some(user_id.to_string()), event).await
    }

    async fn publish(
        &self,
        room_id: &str,
        except_user: Option<String>,
        event: RoomBroadcast,
    ) -> Result<(), RcError> {
        let label = event.label();
        let envelope = BroadcastEnvelope {
            room_id: room_id.to_string(),
            except_user,
            event,
        };
        let payload = serde_json::to_string(&envelope)?;
        self.store
            .publish(&keys::room_events_channel(room_id), &payload)
            .await?;
        debug!(target: "rc.broadcast", room_id = %room_id, event = label, "Broadcast published");
        Ok(())
    }
}
