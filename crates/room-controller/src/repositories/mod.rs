//! Repository layer for durable room records.
//!
//! The coordinator and janitor depend on the [`RoomRepository`] trait; the
//! Postgres implementation lives in [`rooms`].

pub mod rooms;

pub use rooms::PgRoomRepository;

use crate::errors::RcError;
use crate::models::{NewRoomRecord, RoomRecord};
use async_trait::async_trait;

/// Durable store operations on `RoomRecord`, keyed by room ID.
#[async_trait]
pub trait RoomRepository: Send + Sync {
    async fn find_by_room_id(&self, room_id: &str) -> Result<Option<RoomRecord>, RcError>;

    /// Insert the room, or reset an existing row for a fresh run
    /// (new sid, running, participant counter zeroed, `ended_at` cleared).
    async fn upsert_running(&self, record: &NewRoomRecord) -> Result<RoomRecord, RcError>;

    /// Set `is_running = false` and `ended_at = now`.
    ///
    /// Returns whether a running row was updated.
    async fn mark_ended(&self, room_id: &str) -> Result<bool, RcError>;

    async fn list_running(&self) -> Result<Vec<RoomRecord>, RcError>;

    async fn increment_participants(&self, room_id: &str) -> Result<(), RcError>;

    /// Decrement the participant counter, never below zero.
    async fn decrement_participants(&self, room_id: &str) -> Result<(), RcError>;

    async fn set_participant_count(&self, room_id: &str, count: i64) -> Result<(), RcError>;
}
