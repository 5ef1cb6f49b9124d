//! Duration tracking for Active rooms.
//!
//! A `DurationEntry` exists only while its room is Active and has a non-zero
//! configured duration. Entries live in one shared-store hash keyed by room
//! ID so the janitor can sweep them in a single read.

use crate::clock::Clock;
use crate::errors::RcError;
use crate::models::DurationEntry;
use crate::store::{self, keys, SharedStore};
use std::sync::Arc;
use tracing::{debug, info, instrument};

#[derive(Clone)]
pub struct DurationTracker {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
}

impl DurationTracker {
    pub fn new(store: Arc<dyn SharedStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Start tracking `room_id` from now.
    ///
    /// A zero duration means unlimited: nothing is recorded and any stale
    /// entry is dropped.
    #[instrument(skip_all, fields(room_id = %room_id, duration_minutes))]
    pub async fn start(
        &self,
        room_id: &str,
        duration_minutes: u64,
    ) -> Result<Option<DurationEntry>, RcError> {
        if duration_minutes == 0 {
            self.remove(room_id).await?;
            return Ok(None);
        }

        let entry = DurationEntry {
            room_id: room_id.to_string(),
            duration_minutes,
            started_at: self.clock.now_secs(),
        };
        store::hash_set_json(self.store.as_ref(), keys::durations(), room_id, &entry).await?;
        info!(
            target: "rc.rooms",
            room_id = %room_id,
            duration_minutes,
            expires_at = entry.expires_at(),
            "Room duration tracking started"
        );
        Ok(Some(entry))
    }

    pub async fn get(&self, room_id: &str) -> Result<Option<DurationEntry>, RcError> {
        store::hash_get_json(self.store.as_ref(), keys::durations(), room_id).await
    }

    /// Stop tracking. Returns whether an entry existed.
    pub async fn remove(&self, room_id: &str) -> Result<bool, RcError> {
        let removed = self.store.hash_delete(keys::durations(), room_id).await?;
        if removed {
            debug!(target: "rc.rooms", room_id = %room_id, "Room duration tracking removed");
        }
        Ok(removed)
    }

    pub async fn list(&self) -> Result<Vec<DurationEntry>, RcError> {
        store::hash_values_json(self.store.as_ref(), keys::durations()).await
    }

    /// Entries whose `started_at + duration` is strictly in the past.
    pub async fn expired(&self) -> Result<Vec<DurationEntry>, RcError> {
        let now = self.clock.now_secs();
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|entry| entry.is_expired(now))
            .collect())
    }

    /// Extend a tracked room by `extra_minutes`. Returns the new duration.
    ///
    /// # Errors
    ///
    /// `RcError::RoomNotFound` if the room has no duration entry.
    #[instrument(skip_all, fields(room_id = %room_id, extra_minutes))]
    pub async fn increase(&self, room_id: &str, extra_minutes: u64) -> Result<u64, RcError> {
        let mut entry = self
            .get(room_id)
            .await?
            .ok_or_else(|| RcError::RoomNotFound(room_id.to_string()))?;

        entry.duration_minutes = entry.duration_minutes.saturating_add(extra_minutes);
        store::hash_set_json(self.store.as_ref(), keys::durations(), room_id, &entry).await?;
        info!(
            target: "rc.rooms",
            room_id = %room_id,
            duration_minutes = entry.duration_minutes,
            "Room duration increased"
        );
        Ok(entry.duration_minutes)
    }
}
