//! Per-room messaging infrastructure bookkeeping.
//!
//! Each room owns a message stream and each connected user owns a consumer
//! on it. Both are tracked in the shared store so any instance can verify,
//! repair or tear them down.

use crate::errors::RcError;
use crate::store::{keys, SharedStore};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct MessagingInfra {
    store: Arc<dyn SharedStore>,
}

impl MessagingInfra {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Make sure the room's stream exists.
    ///
    /// Returns `true` when the stream was missing and has been recreated.
    pub async fn ensure_room(&self, room_id: &str) -> Result<bool, RcError> {
        let key = keys::room_stream(room_id);
        if self.store.exists(&key).await? {
            return Ok(false);
        }

        let marker = serde_json::json!({ "room_id": room_id }).to_string();
        self.store.set(&key, &marker, None).await?;
        info!(target: "rc.messaging", room_id = %room_id, "Room stream created");
        Ok(true)
    }

    pub async fn room_exists(&self, room_id: &str) -> Result<bool, RcError> {
        self.store.exists(&keys::room_stream(room_id)).await
    }

    /// Register the user's dedicated consumer. Idempotent.
    pub async fn ensure_user_consumer(&self, room_id: &str, user_id: &str) -> Result<(), RcError> {
        self.store
            .set_add(&keys::room_consumers(room_id), user_id)
            .await?;
        debug!(target: "rc.messaging", room_id = %room_id, user_id = %user_id, "User consumer registered");
        Ok(())
    }

    /// Tear down the user's consumer. Returns whether one existed.
    pub async fn remove_user_consumer(&self, room_id: &str, user_id: &str) -> Result<bool, RcError> {
        let removed = self
            .store
            .set_remove(&keys::room_consumers(room_id), user_id)
            .await?;
        if removed {
            debug!(target: "rc.messaging", room_id = %room_id, user_id = %user_id, "User consumer removed");
        }
        Ok(removed)
    }

    pub async fn consumers(&self, room_id: &str) -> Result<Vec<String>, RcError> {
        self.store.set_members(&keys::room_consumers(room_id)).await
    }

    /// Drop the room's stream and every consumer on it.
    pub async fn delete_room(&self, room_id: &str) -> Result<(), RcError> {
        self.store.delete(&keys::room_consumers(room_id)).await?;
        self.store.delete(&keys::room_stream(room_id)).await?;
        info!(target: "rc.messaging", room_id = %room_id, "Room stream deleted");
        Ok(())
    }
}
