//! Room lifecycle coordinator.
//!
//! Keeps three stores consistent for each room: the durable `RoomRecord`,
//! the shared-store `RoomStateEntry` and the media engine room.
//!
//! # Ordering
//!
//! Creation runs inside the room-creation lock. End (and any path that
//! hands out join credentials) first waits for in-flight creation to finish,
//! so it never races ahead of a create for the same room.
//!
//! # Webhooks
//!
//! Media engine events name the room and the engine's own room sid. An event
//! whose sid does not match the live state entry belongs to an earlier run of
//! the room and is dropped.
//!
//! # Self-healing reads
//!
//! `is_room_active` and `get_active_room_info` correct a durable record that
//! claims the room is running when the live state or media room is gone.
//! The record is marked ended as a side effect of the read, so callers
//! never observe the stale running state twice.

use super::DurationTracker;
use crate::agents::AgentSupervisor;
use crate::clock::Clock;
use crate::config::RoomConfig;
use crate::errors::RcError;
use crate::lock::RoomCreationLock;
use crate::models::{
    ActiveRoomInfo, CreateRoomRequest, EndReason, EndRoomRequest, NewRoomRecord,
    ParticipantInfo, RoomActiveStatus, RoomRecord, RoomStateEntry, RoomStatus, UserStateEntry,
};
use crate::observability::metrics;
use crate::repositories::RoomRepository;
use crate::services::{
    Broadcaster, CreateMediaRoom, EventSink, MediaEngine, MessagingInfra, RoomBroadcast,
    WebhookEvent,
};
use crate::store::{self, keys, SharedStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Collaborators of the coordinator, grouped for construction.
#[derive(Clone)]
pub struct CoordinatorDeps {
    pub store: Arc<dyn SharedStore>,
    pub rooms: Arc<dyn RoomRepository>,
    pub media: Arc<dyn MediaEngine>,
    pub events: Arc<dyn EventSink>,
    pub broadcaster: Broadcaster,
    pub messaging: MessagingInfra,
    pub creation_lock: RoomCreationLock,
    pub durations: DurationTracker,
    pub agents: AgentSupervisor,
    pub clock: Arc<dyn Clock>,
}

/// Create/end/query rooms and react to media engine webhooks.
#[derive(Clone)]
pub struct RoomCoordinator {
    store: Arc<dyn SharedStore>,
    rooms: Arc<dyn RoomRepository>,
    media: Arc<dyn MediaEngine>,
    events: Arc<dyn EventSink>,
    broadcaster: Broadcaster,
    messaging: MessagingInfra,
    creation_lock: RoomCreationLock,
    durations: DurationTracker,
    agents: AgentSupervisor,
    clock: Arc<dyn Clock>,
    config: RoomConfig,
    /// Process-wide shutdown token; bounds lock waits only.
    cancel: CancellationToken,
}

impl RoomCoordinator {
    pub fn new(deps: CoordinatorDeps, config: RoomConfig, cancel: CancellationToken) -> Self {
        Self {
            store: deps.store,
            rooms: deps.rooms,
            media: deps.media,
            events: deps.events,
            broadcaster: deps.broadcaster,
            messaging: deps.messaging,
            creation_lock: deps.creation_lock,
            durations: deps.durations,
            agents: deps.agents,
            clock: deps.clock,
            config,
            cancel,
        }
    }

    /// Create a room, or return the live one if it already exists.
    ///
    /// # Errors
    ///
    /// - `RcError::LockTimeout` if the creation lock cannot be taken in time
    /// - Store, database and media engine errors from the creation steps
    #[instrument(skip_all, fields(room_id = %request.room_id))]
    pub async fn create_room(&self, request: &CreateRoomRequest) -> Result<ActiveRoomInfo, RcError> {
        self.creation_lock
            .wait_until_complete(&request.room_id, &self.cancel)
            .await?;
        let handle = self
            .creation_lock
            .acquire_with_retry(&request.room_id, &self.cancel)
            .await?;

        let result = self.create_room_locked(request).await;

        self.creation_lock.release(&handle).await;
        result
    }

    async fn create_room_locked(&self, request: &CreateRoomRequest) -> Result<ActiveRoomInfo, RcError> {
        let room_id = request.room_id.as_str();
        let existing = self.rooms.find_by_room_id(room_id).await?;

        if let Some(record) = existing.as_ref().filter(|r| r.is_running) {
            if let Some(entry) = self.room_state(room_id).await? {
                if entry.is_live() && entry.sid == record.sid && entry.db_table_id == record.id {
                    if self.messaging.ensure_room(room_id).await? {
                        warn!(target: "rc.rooms", room_id = %room_id, "Repaired missing room stream on re-entry");
                    }
                    debug!(target: "rc.rooms", room_id = %room_id, sid = %entry.sid, "Room already live, returning existing");
                    return self.build_info(record, &entry).await;
                }
            }
        }

        let sid = format!("RM_{}", Uuid::new_v4().simple());
        let mut metadata = request.metadata.clone();
        metadata.apply_default_policy(self.config.max_duration_minutes);

        let record = self
            .rooms
            .upsert_running(&NewRoomRecord {
                room_id: room_id.to_string(),
                sid: sid.clone(),
                title: metadata.title.clone(),
                is_breakout_room: metadata.is_breakout_room,
                parent_room_id: metadata.parent_room_id.clone(),
                webhook_url: request.webhook_url.clone(),
            })
            .await?;

        let mut entry = RoomStateEntry {
            room_id: room_id.to_string(),
            sid: sid.clone(),
            db_table_id: record.id,
            media_sid: String::new(),
            status: RoomStatus::Created,
            metadata,
            empty_timeout_seconds: request
                .empty_timeout_seconds
                .unwrap_or(self.config.default_empty_timeout_seconds),
            max_participants: request.max_participants.unwrap_or(0),
            created_at: self.clock.now_millis(),
            started_at: None,
        };
        store::set_json(self.store.as_ref(), &keys::room_state(room_id), &entry, None).await?;
        self.store.set_add(keys::active_rooms(), room_id).await?;
        // A previous run of this room may have left an entry behind
        self.durations.remove(room_id).await?;

        let media_request = CreateMediaRoom {
            name: room_id.to_string(),
            empty_timeout: entry.empty_timeout_seconds,
            max_participants: entry.max_participants,
            metadata: serde_json::to_string(&entry.metadata)?,
        };
        match self.media.create_room(&media_request).await {
            Ok(media_room) => entry.media_sid = media_room.sid,
            Err(e) => {
                warn!(target: "rc.rooms", room_id = %room_id, error = %e, "Media engine room creation failed");
                self.discard_state(room_id).await;
                return Err(e);
            }
        }
        store::set_json(self.store.as_ref(), &keys::room_state(room_id), &entry, None).await?;

        self.messaging.ensure_room(room_id).await?;

        metrics::record_room_created();
        info!(
            target: "rc.rooms",
            room_id = %room_id,
            sid = %sid,
            media_sid = %entry.media_sid,
            db_table_id = record.id,
            "Room created"
        );

        self.spawn_webhook(WebhookEvent::RoomCreated, &record);
        self.build_info(&record, &entry).await
    }

    /// End a running room.
    ///
    /// Waits for in-flight creation, then tears down best-effort: every step
    /// after the existence check is attempted even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// - `RcError::RoomNotFound` if there is no running record
    /// - `RcError::LockTimeout` if a creation stays in flight past the wait
    #[instrument(skip_all, fields(room_id = %request.room_id, reason = request.reason.as_str()))]
    pub async fn end_room(&self, request: &EndRoomRequest) -> Result<(), RcError> {
        let room_id = request.room_id.as_str();
        self.creation_lock
            .wait_until_complete(room_id, &self.cancel)
            .await?;

        let record = self
            .rooms
            .find_by_room_id(room_id)
            .await?
            .filter(|r| r.is_running)
            .ok_or_else(|| RcError::RoomNotFound(room_id.to_string()))?;

        if let Err(e) = self
            .broadcaster
            .to_room(room_id, RoomBroadcast::SessionEnding { reason: request.reason })
            .await
        {
            warn!(target: "rc.rooms", room_id = %room_id, error = %e, "Failed to broadcast session ending");
        }

        if let Err(e) = self.mark_state_ended(room_id).await {
            warn!(target: "rc.rooms", room_id = %room_id, error = %e, "Failed to mark room state ended");
        }

        if request.reason != EndReason::MediaRoomFinished {
            if let Err(e) = self.media.delete_room(room_id).await {
                warn!(target: "rc.rooms", room_id = %room_id, error = %e, "Failed to delete media engine room");
            }
        }

        if let Err(e) = self.rooms.mark_ended(room_id).await {
            warn!(target: "rc.rooms", room_id = %room_id, error = %e, "Failed to mark room record ended");
        }

        if let Err(e) = self.durations.remove(room_id).await {
            warn!(target: "rc.rooms", room_id = %room_id, error = %e, "Failed to remove duration entry");
        }

        if let Err(e) = self.store.delete(&keys::room_users(room_id)).await {
            warn!(target: "rc.rooms", room_id = %room_id, error = %e, "Failed to drop user states");
        }

        if let Err(e) = self.messaging.delete_room(room_id).await {
            warn!(target: "rc.rooms", room_id = %room_id, error = %e, "Failed to delete room stream");
        }

        let agents_ended = self.agents.end_all_for_room(room_id).await;
        if agents_ended > 0 {
            debug!(target: "rc.rooms", room_id = %room_id, agents_ended, "Ended local agents");
        }

        metrics::record_room_ended(request.reason);
        info!(
            target: "rc.rooms",
            room_id = %room_id,
            sid = %record.sid,
            reason = request.reason.as_str(),
            "Room ended"
        );

        self.spawn_webhook(WebhookEvent::RoomFinished, &record);
        Ok(())
    }

    /// Whether the room is running, healing stale durable state on the way.
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn is_room_active(&self, room_id: &str) -> Result<RoomActiveStatus, RcError> {
        match self.live_room(room_id).await? {
            Some((_, entry)) => Ok(RoomActiveStatus {
                is_active: true,
                metadata: Some(entry.metadata),
                message: "room is active".to_string(),
            }),
            None => Ok(RoomActiveStatus::inactive("room is not running")),
        }
    }

    /// Room and participant snapshot for a live room.
    ///
    /// # Errors
    ///
    /// `RcError::RoomNotFound` if the room is not live (after self-healing).
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn get_active_room_info(&self, room_id: &str) -> Result<ActiveRoomInfo, RcError> {
        let (record, entry) = self
            .live_room(room_id)
            .await?
            .ok_or_else(|| RcError::RoomNotFound(room_id.to_string()))?;
        self.build_info(&record, &entry).await
    }

    /// Snapshots for every live room. Stale records are healed and skipped.
    #[instrument(skip_all)]
    pub async fn get_active_rooms_info(&self) -> Result<Vec<ActiveRoomInfo>, RcError> {
        let running = self.rooms.list_running().await?;
        let mut rooms = Vec::with_capacity(running.len());
        for record in running {
            if let Some((record, entry)) = self.live_room(&record.room_id).await? {
                rooms.push(self.build_info(&record, &entry).await?);
            }
        }
        Ok(rooms)
    }

    /// Block until no creation is in flight for `room_id`.
    ///
    /// Token-issuing paths call this so a join never races an in-flight create.
    pub async fn wait_for_room_ready(&self, room_id: &str) -> Result<(), RcError> {
        self.creation_lock
            .wait_until_complete(room_id, &self.cancel)
            .await
    }

    /// Media engine `room_started`: Created → Active and start duration tracking.
    ///
    /// Events for another run of the room (`media_sid` mismatch) are ignored.
    ///
    /// # Errors
    ///
    /// `RcError::RoomNotFound` if there is no state entry for the room.
    #[instrument(skip_all, fields(room_id = %room_id, media_sid = %media_sid))]
    pub async fn on_room_started(&self, room_id: &str, media_sid: &str) -> Result<(), RcError> {
        self.wait_for_room_ready(room_id).await?;

        let entry = self
            .room_state(room_id)
            .await?
            .ok_or_else(|| RcError::RoomNotFound(room_id.to_string()))?;
        if !self.accepts_webhook(&entry, media_sid, "room_started") {
            return Ok(());
        }
        if !entry.status.can_transition_to(RoomStatus::Active) {
            debug!(
                target: "rc.rooms",
                room_id = %room_id,
                status = entry.status.as_str(),
                "Ignoring room_started for room past Created"
            );
            return Ok(());
        }

        let record_running = self
            .rooms
            .find_by_room_id(room_id)
            .await?
            .is_some_and(|r| r.is_running && r.sid == entry.sid);
        if !record_running {
            debug!(target: "rc.rooms", room_id = %room_id, "Ignoring room_started, room record no longer running");
            return Ok(());
        }

        // An end may have landed since the first read
        let Some(mut entry) = self
            .room_state(room_id)
            .await?
            .filter(|e| e.media_sid == media_sid && e.status.can_transition_to(RoomStatus::Active))
        else {
            debug!(target: "rc.rooms", room_id = %room_id, "Ignoring room_started, state changed underneath");
            return Ok(());
        };

        entry.status = RoomStatus::Active;
        entry.started_at = Some(self.clock.now_millis());
        store::set_json(self.store.as_ref(), &keys::room_state(room_id), &entry, None).await?;
        self.durations
            .start(room_id, entry.metadata.features.duration_minutes)
            .await?;

        info!(target: "rc.rooms", room_id = %room_id, sid = %entry.sid, "Room active");
        Ok(())
    }

    /// Media engine `room_finished`: end locally without calling the engine back.
    ///
    /// Only the run the event belongs to is ended. Events for an earlier run,
    /// and repeats for a room already ended, are ignored.
    #[instrument(skip_all, fields(room_id = %room_id, media_sid = %media_sid))]
    pub async fn on_room_finished(&self, room_id: &str, media_sid: &str) -> Result<(), RcError> {
        self.wait_for_room_ready(room_id).await?;

        match self.room_state(room_id).await? {
            Some(entry) if self.accepts_webhook(&entry, media_sid, "room_finished") => {}
            Some(_) => return Ok(()),
            None => {
                debug!(target: "rc.rooms", room_id = %room_id, "room_finished for a room with no state");
                return Ok(());
            }
        }

        let request = EndRoomRequest {
            room_id: room_id.to_string(),
            reason: EndReason::MediaRoomFinished,
        };
        match self.end_room(&request).await {
            Err(RcError::RoomNotFound(_)) => {
                debug!(target: "rc.rooms", room_id = %room_id, "room_finished for a room already ended");
                Ok(())
            }
            other => other,
        }
    }

    pub async fn on_participant_joined(&self, room_id: &str) -> Result<(), RcError> {
        self.rooms.increment_participants(room_id).await
    }

    pub async fn on_participant_left(&self, room_id: &str) -> Result<(), RcError> {
        self.rooms.decrement_participants(room_id).await
    }

    /// Current shared-store state entry, if any.
    pub async fn room_state(&self, room_id: &str) -> Result<Option<RoomStateEntry>, RcError> {
        store::get_json(self.store.as_ref(), &keys::room_state(room_id)).await
    }

    /// Room IDs with a live state entry.
    pub async fn active_room_ids(&self) -> Result<Vec<String>, RcError> {
        self.store.set_members(keys::active_rooms()).await
    }

    /// Correct a running record whose live state is gone.
    ///
    /// Marks the record ended, ends any lingering state entry and drops the
    /// duration entry.
    pub(crate) async fn heal(&self, record: &RoomRecord, cause: &'static str) -> Result<(), RcError> {
        warn!(
            target: "rc.rooms",
            room_id = %record.room_id,
            sid = %record.sid,
            cause,
            "Durable record says running without live state, marking ended"
        );
        self.rooms.mark_ended(&record.room_id).await?;
        self.mark_state_ended(&record.room_id).await?;
        self.durations.remove(&record.room_id).await?;
        metrics::record_self_heal();
        Ok(())
    }

    /// Whether a webhook carrying `media_sid` belongs to the run in `entry`.
    fn accepts_webhook(&self, entry: &RoomStateEntry, media_sid: &str, event: &'static str) -> bool {
        if entry.media_sid == media_sid {
            return true;
        }
        debug!(
            target: "rc.rooms",
            room_id = %entry.room_id,
            event,
            current_media_sid = %entry.media_sid,
            stale_media_sid = %media_sid,
            "Ignoring webhook for another run of the room"
        );
        false
    }

    /// Running record plus live state entry, healing on mismatch.
    async fn live_room(&self, room_id: &str) -> Result<Option<(RoomRecord, RoomStateEntry)>, RcError> {
        let Some(record) = self
            .rooms
            .find_by_room_id(room_id)
            .await?
            .filter(|r| r.is_running)
        else {
            return Ok(None);
        };

        let entry = match self.room_state(room_id).await? {
            Some(entry) if entry.is_live() && entry.sid == record.sid => entry,
            _ => {
                self.heal(&record, "state_missing").await?;
                return Ok(None);
            }
        };

        match self.media.get_room(room_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.heal(&record, "media_room_missing").await?;
                return Ok(None);
            }
            Err(e) => {
                // Engine unreachable is not evidence the room is gone
                warn!(target: "rc.rooms", room_id = %room_id, error = %e, "Media engine lookup failed, trusting live state");
            }
        }

        Ok(Some((record, entry)))
    }

    /// Move the state entry to Ended, keep it for the retention window,
    /// and drop it from the active set.
    async fn mark_state_ended(&self, room_id: &str) -> Result<(), RcError> {
        if let Some(mut entry) = self.room_state(room_id).await? {
            if entry.status.can_transition_to(RoomStatus::Ended) {
                entry.status = RoomStatus::Ended;
                store::set_json(
                    self.store.as_ref(),
                    &keys::room_state(room_id),
                    &entry,
                    Some(self.config.ended_room_retention),
                )
                .await?;
            }
        }
        self.store.set_remove(keys::active_rooms(), room_id).await?;
        Ok(())
    }

    /// Drop the state entry written by a creation that failed downstream.
    async fn discard_state(&self, room_id: &str) {
        if let Err(e) = self.store.delete(&keys::room_state(room_id)).await {
            warn!(target: "rc.rooms", room_id = %room_id, error = %e, "Failed to discard room state");
        }
        if let Err(e) = self.store.set_remove(keys::active_rooms(), room_id).await {
            warn!(target: "rc.rooms", room_id = %room_id, error = %e, "Failed to drop room from active set");
        }
    }

    async fn build_info(&self, record: &RoomRecord, entry: &RoomStateEntry) -> Result<ActiveRoomInfo, RcError> {
        let users: Vec<UserStateEntry> =
            store::hash_values_json(self.store.as_ref(), &keys::room_users(&record.room_id)).await?;
        let mut participants: Vec<ParticipantInfo> = users.iter().map(ParticipantInfo::from).collect();
        participants.sort_by(|a, b| a.user_id.cmp(&b.user_id));

        Ok(ActiveRoomInfo {
            room_id: record.room_id.clone(),
            sid: entry.sid.clone(),
            db_table_id: record.id,
            title: record.title.clone(),
            status: entry.status,
            is_running: record.is_running,
            created_at: record.created_at,
            joined_participants: record.joined_participants,
            is_breakout_room: record.is_breakout_room,
            parent_room_id: record.parent_room_id.clone(),
            metadata: entry.metadata.clone(),
            participants,
        })
    }

    fn spawn_webhook(&self, event: WebhookEvent, record: &RoomRecord) {
        let events = Arc::clone(&self.events);
        let room_id = record.room_id.clone();
        let sid = record.sid.clone();
        let webhook_url = record.webhook_url.clone();
        tokio::spawn(async move {
            events
                .emit_webhook(event, &room_id, &sid, webhook_url.as_deref())
                .await;
        });
    }
}
