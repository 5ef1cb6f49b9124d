//! Presence tracking.
//!
//! Per-(room, user) state machine:
//!
//! ```text
//!   ping                     disconnect
//!  ─────► Online ◄──────────────────────► Disconnected
//!           ▲            ping                 │ offline grace elapsed,
//!           │                                 ▼ still not Online
//!           └────────── fresh ping ─────── Offline ──► cleanup grace elapsed,
//!                                                      consumer + entry dropped
//! ```
//!
//! Grace periods are sleep-then-recheck: a pending check is never cancelled
//! by a reconnect. It wakes, re-reads the entry and does nothing if the user
//! is Online again. Entries are last-write-wins; two checks racing on a
//! flapping connection can both write the same terminal state.

use crate::clock::Clock;
use crate::config::PresenceConfig;
use crate::errors::RcError;
use crate::models::{RoomStateEntry, UserStateEntry, UserStatus};
use crate::observability::metrics;
use crate::services::{AnalyticsEvent, Broadcaster, EventSink, MessagingInfra, RoomBroadcast};
use crate::store::{self, keys, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Collaborators of the presence tracker, grouped for construction.
#[derive(Clone)]
pub struct PresenceDeps {
    pub store: Arc<dyn SharedStore>,
    pub broadcaster: Broadcaster,
    pub messaging: MessagingInfra,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct PresenceTracker {
    store: Arc<dyn SharedStore>,
    broadcaster: Broadcaster,
    messaging: MessagingInfra,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: PresenceConfig,
    /// Grace tasks run on child tokens of this one.
    cancel: CancellationToken,
}

impl PresenceTracker {
    pub fn new(deps: PresenceDeps, config: PresenceConfig, cancel: CancellationToken) -> Self {
        Self {
            store: deps.store,
            broadcaster: deps.broadcaster,
            messaging: deps.messaging,
            events: deps.events,
            clock: deps.clock,
            config,
            cancel,
        }
    }

    #[must_use]
    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Client heartbeat.
    ///
    /// Promotes the user to Online (announcing the join) unless already
    /// Online, and always refreshes `last_ping_at`.
    ///
    /// # Errors
    ///
    /// `RcError::RoomNotFound` unless the room has a live state entry. Nothing
    /// is written for a room that was never created or has already ended.
    #[instrument(skip_all, fields(room_id = %room_id, user_id = %user_id))]
    pub async fn on_ping(&self, room_id: &str, user_id: &str) -> Result<UserStateEntry, RcError> {
        let room_live = store::get_json::<RoomStateEntry>(self.store.as_ref(), &keys::room_state(room_id))
            .await?
            .is_some_and(|entry| entry.is_live());
        if !room_live {
            debug!(target: "rc.presence", room_id = %room_id, user_id = %user_id, "Ping for a room that is not live");
            return Err(RcError::RoomNotFound(room_id.to_string()));
        }

        let now = self.clock.now_millis();
        let existing = self.get_user(room_id, user_id).await?;
        let was_online = existing
            .as_ref()
            .is_some_and(|u| u.status == UserStatus::Online);

        let mut entry = existing.unwrap_or_else(|| UserStateEntry {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            status: UserStatus::Offline,
            last_ping_at: now,
            is_admin: false,
            is_presenter: false,
            metadata: serde_json::Value::Null,
        });
        entry.status = UserStatus::Online;
        entry.last_ping_at = now;
        self.put_user(&entry).await?;

        if !was_online {
            metrics::record_presence_transition(UserStatus::Online);
            info!(target: "rc.presence", room_id = %room_id, user_id = %user_id, "User online");

            if let Err(e) = self
                .broadcaster
                .to_room_except(
                    room_id,
                    user_id,
                    RoomBroadcast::UserOnline {
                        user_id: user_id.to_string(),
                    },
                )
                .await
            {
                warn!(target: "rc.presence", room_id = %room_id, user_id = %user_id, error = %e, "Failed to broadcast user online");
            }
            self.events
                .record_analytics(AnalyticsEvent::UserJoined, room_id, user_id)
                .await;
            if let Err(e) = self.messaging.ensure_user_consumer(room_id, user_id).await {
                warn!(target: "rc.presence", room_id = %room_id, user_id = %user_id, error = %e, "Failed to register user consumer");
            }
        }

        Ok(entry)
    }

    /// Transport to the client dropped.
    ///
    /// Marks an Online user Disconnected right away, then schedules the two
    /// grace checks on a background task. Users that are not Online are left
    /// to whichever check is already pending.
    ///
    /// # Errors
    ///
    /// `RcError::UserNotFound` if the user has no presence entry in the room.
    #[instrument(skip_all, fields(room_id = %room_id, user_id = %user_id))]
    pub async fn on_transport_disconnected(&self, room_id: &str, user_id: &str) -> Result<(), RcError> {
        let mut entry = self
            .get_user(room_id, user_id)
            .await?
            .ok_or_else(|| RcError::UserNotFound(user_id.to_string()))?;

        if entry.status != UserStatus::Online {
            debug!(
                target: "rc.presence",
                room_id = %room_id,
                user_id = %user_id,
                status = entry.status.as_str(),
                "Disconnect for user not online, ignoring"
            );
            return Ok(());
        }

        entry.status = UserStatus::Disconnected;
        self.put_user(&entry).await?;
        metrics::record_presence_transition(UserStatus::Disconnected);
        debug!(target: "rc.presence", room_id = %room_id, user_id = %user_id, "User disconnected");

        if let Err(e) = self
            .broadcaster
            .to_room_except(
                room_id,
                user_id,
                RoomBroadcast::UserDisconnected {
                    user_id: user_id.to_string(),
                },
            )
            .await
        {
            warn!(target: "rc.presence", room_id = %room_id, user_id = %user_id, error = %e, "Failed to broadcast user disconnected");
        }

        let tracker = self.clone();
        let cancel = self.cancel.child_token();
        let room_id = room_id.to_string();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            tracker.run_disconnect_grace(&room_id, &user_id, &cancel).await;
        });

        Ok(())
    }

    /// Offline path used by the staleness sweep.
    ///
    /// Moves a non-Offline user to Offline immediately and schedules the
    /// cleanup check. Returns whether a transition happened.
    #[instrument(skip_all, fields(room_id = %room_id, user_id = %user_id))]
    pub async fn force_offline(&self, room_id: &str, user_id: &str) -> Result<bool, RcError> {
        if !self.mark_offline_unless_online(room_id, user_id, true).await? {
            return Ok(false);
        }

        let tracker = self.clone();
        let cancel = self.cancel.child_token();
        let room_id = room_id.to_string();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            if sleep_or_cancelled(tracker.config.cleanup_grace, &cancel).await {
                tracker.log_cleanup(&room_id, &user_id).await;
            }
        });

        Ok(true)
    }

    /// Release the user's messaging consumer and drop the entry, if Offline.
    ///
    /// Returns whether anything was released.
    pub async fn cleanup_user(&self, room_id: &str, user_id: &str) -> Result<bool, RcError> {
        match self.get_user(room_id, user_id).await? {
            Some(entry) if entry.status == UserStatus::Offline => {}
            Some(_) => {
                debug!(target: "rc.presence", room_id = %room_id, user_id = %user_id, "User back before cleanup, keeping resources");
                return Ok(false);
            }
            None => return Ok(false),
        }

        self.messaging.remove_user_consumer(room_id, user_id).await?;
        self.store
            .hash_delete(&keys::room_users(room_id), user_id)
            .await?;
        info!(target: "rc.presence", room_id = %room_id, user_id = %user_id, "User resources released");
        Ok(true)
    }

    /// Update per-user flags and metadata. Last write wins.
    ///
    /// # Errors
    ///
    /// `RcError::UserNotFound` if the user has no presence entry in the room.
    pub async fn update_user_info(
        &self,
        room_id: &str,
        user_id: &str,
        is_admin: bool,
        is_presenter: bool,
        metadata: serde_json::Value,
    ) -> Result<UserStateEntry, RcError> {
        let mut entry = self
            .get_user(room_id, user_id)
            .await?
            .ok_or_else(|| RcError::UserNotFound(user_id.to_string()))?;
        entry.is_admin = is_admin;
        entry.is_presenter = is_presenter;
        entry.metadata = metadata;
        self.put_user(&entry).await?;
        Ok(entry)
    }

    pub async fn get_user(&self, room_id: &str, user_id: &str) -> Result<Option<UserStateEntry>, RcError> {
        store::hash_get_json(self.store.as_ref(), &keys::room_users(room_id), user_id).await
    }

    /// Every presence entry in the room, ordered by user ID.
    pub async fn list_users(&self, room_id: &str) -> Result<Vec<UserStateEntry>, RcError> {
        let mut users: Vec<UserStateEntry> =
            store::hash_values_json(self.store.as_ref(), &keys::room_users(room_id)).await?;
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(users)
    }

    async fn put_user(&self, entry: &UserStateEntry) -> Result<(), RcError> {
        store::hash_set_json(
            self.store.as_ref(),
            &keys::room_users(&entry.room_id),
            &entry.user_id,
            entry,
        )
        .await
    }

    async fn run_disconnect_grace(&self, room_id: &str, user_id: &str, cancel: &CancellationToken) {
        if !sleep_or_cancelled(self.config.offline_grace, cancel).await {
            return;
        }
        if let Err(e) = self.mark_offline_unless_online(room_id, user_id, false).await {
            warn!(target: "rc.presence", room_id = %room_id, user_id = %user_id, error = %e, "Offline grace check failed");
        }

        if !sleep_or_cancelled(self.config.cleanup_grace, cancel).await {
            return;
        }
        self.log_cleanup(room_id, user_id).await;
    }

    async fn log_cleanup(&self, room_id: &str, user_id: &str) {
        if let Err(e) = self.cleanup_user(room_id, user_id).await {
            warn!(target: "rc.presence", room_id = %room_id, user_id = %user_id, error = %e, "Cleanup grace check failed");
        }
    }

    /// Re-read the entry and move it to Offline unless the user is Online
    /// (or already Offline). `force` also moves Online users.
    async fn mark_offline_unless_online(&self, room_id: &str, user_id: &str, force: bool) -> Result<bool, RcError> {
        let Some(mut entry) = self.get_user(room_id, user_id).await? else {
            return Ok(false);
        };

        match entry.status {
            UserStatus::Offline => return Ok(false),
            UserStatus::Online if !force => {
                debug!(target: "rc.presence", room_id = %room_id, user_id = %user_id, "User reconnected within grace");
                return Ok(false);
            }
            UserStatus::Online | UserStatus::Disconnected => {}
        }

        entry.status = UserStatus::Offline;
        self.put_user(&entry).await?;
        metrics::record_presence_transition(UserStatus::Offline);
        info!(target: "rc.presence", room_id = %room_id, user_id = %user_id, forced = force, "User offline");

        if let Err(e) = self
            .broadcaster
            .to_room_except(
                room_id,
                user_id,
                RoomBroadcast::UserOffline {
                    user_id: user_id.to_string(),
                },
            )
            .await
        {
            warn!(target: "rc.presence", room_id = %room_id, user_id = %user_id, error = %e, "Failed to broadcast user offline");
        }
        self.events
            .record_analytics(AnalyticsEvent::UserLeft, room_id, user_id)
            .await;
        Ok(true)
    }
}

/// Sleep for `duration`; `false` if cancelled first.
async fn sleep_or_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = tokio::time::sleep(duration) => true,
        () = cancel.cancelled() => false,
    }
}
