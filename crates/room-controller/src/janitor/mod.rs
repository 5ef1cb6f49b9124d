//! Janitor background task.
//!
//! One ticking loop per instance. The shortest period (the tick) drives the
//! duration-expiry sweep; the other sweeps carry a "next due" instant and run
//! on the first tick at or after it:
//!
//! | Task | Default period |
//! |---|---|
//! | `duration_sweep` | every tick (5s) |
//! | `presence_sweep` | 60s |
//! | `drift_sweep` | 300s |
//! | `artifact_cleanup` | 3600s |
//!
//! Each task takes its own short-TTL lock (`rc:lock:janitor:{task}`) before
//! running and releases it afterwards. If the lock is held, by another
//! instance or by an overrunning run here, the task is skipped for that
//! tick. A failure on one room is logged and the sweep moves on.
//!
//! # Graceful Shutdown
//!
//! The loop exits when the cancellation token fires. A sweep in progress
//! completes first.

use crate::clock::{duration_ms, duration_ms_i64, Clock};
use crate::config::JanitorConfig;
use crate::errors::RcError;
use crate::lock::DistributedLock;
use crate::models::{EndReason, EndRoomRequest, RoomRecord, UserStatus};
use crate::observability::metrics::{self, TaskOutcome};
use crate::presence::PresenceTracker;
use crate::repositories::RoomRepository;
use crate::rooms::{DurationTracker, RoomCoordinator};
use crate::services::MediaEngine;
use crate::store::keys;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub const DURATION_SWEEP: &str = "duration_sweep";
pub const PRESENCE_SWEEP: &str = "presence_sweep";
pub const DRIFT_SWEEP: &str = "drift_sweep";
pub const ARTIFACT_CLEANUP: &str = "artifact_cleanup";

/// Result of one lock-guarded task run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRun {
    /// The task ran; `affected` counts rooms, users or files acted on.
    Completed { affected: usize },
    /// The task lock was held elsewhere.
    Skipped,
}

/// What the drift sweep did with one running record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriftAction {
    None,
    MarkedNotRunning,
    Ended,
}

/// Next-due instants for the less frequent tasks.
#[derive(Debug, Clone)]
pub struct Schedule {
    presence_due: Instant,
    drift_due: Instant,
    cleanup_due: Instant,
}

impl Schedule {
    /// Everything due immediately.
    #[must_use]
    pub fn starting_at(now: Instant) -> Self {
        Self {
            presence_due: now,
            drift_due: now,
            cleanup_due: now,
        }
    }
}

/// Collaborators of the janitor, grouped for construction.
#[derive(Clone)]
pub struct JanitorDeps {
    pub coordinator: RoomCoordinator,
    pub presence: PresenceTracker,
    pub durations: DurationTracker,
    pub rooms: Arc<dyn RoomRepository>,
    pub media: Arc<dyn MediaEngine>,
    pub lock: DistributedLock,
    pub clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub struct Janitor {
    coordinator: RoomCoordinator,
    presence: PresenceTracker,
    durations: DurationTracker,
    rooms: Arc<dyn RoomRepository>,
    media: Arc<dyn MediaEngine>,
    lock: DistributedLock,
    clock: Arc<dyn Clock>,
    config: JanitorConfig,
}

impl Janitor {
    pub fn new(deps: JanitorDeps, config: JanitorConfig) -> Self {
        Self {
            coordinator: deps.coordinator,
            presence: deps.presence,
            durations: deps.durations,
            rooms: deps.rooms,
            media: deps.media,
            lock: deps.lock,
            clock: deps.clock,
            config,
        }
    }

    /// Run the janitor until `cancel_token` fires.
    #[instrument(skip_all, name = "rc.janitor")]
    pub async fn run(self, cancel_token: CancellationToken) {
        info!(
            target: "rc.janitor",
            tick_ms = duration_ms(self.config.tick_interval),
            presence_interval_ms = duration_ms(self.config.presence_interval),
            drift_interval_ms = duration_ms(self.config.drift_interval),
            cleanup_interval_ms = duration_ms(self.config.cleanup_interval),
            "Starting janitor"
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut schedule = Schedule::starting_at(Instant::now());

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick(&mut schedule).await;
                }
                () = cancel_token.cancelled() => {
                    info!(target: "rc.janitor", "Janitor received shutdown signal, exiting");
                    break;
                }
            }
        }

        info!(target: "rc.janitor", "Janitor stopped");
    }

    /// One tick: the duration sweep, plus whichever other tasks are due.
    pub async fn tick(&self, schedule: &mut Schedule) {
        log_run(DURATION_SWEEP, self.run_duration_sweep().await);

        let now = Instant::now();
        if now >= schedule.presence_due {
            schedule.presence_due = now + self.config.presence_interval;
            log_run(PRESENCE_SWEEP, self.run_presence_sweep().await);
        }
        if now >= schedule.drift_due {
            schedule.drift_due = now + self.config.drift_interval;
            log_run(DRIFT_SWEEP, self.run_drift_sweep().await);
        }
        if now >= schedule.cleanup_due {
            schedule.cleanup_due = now + self.config.cleanup_interval;
            log_run(ARTIFACT_CLEANUP, self.run_artifact_cleanup().await);
        }
    }

    /// End every room whose duration has elapsed.
    pub async fn run_duration_sweep(&self) -> Result<TaskRun, RcError> {
        self.guarded(DURATION_SWEEP, || self.sweep_durations()).await
    }

    /// Force Offline every user whose last ping is older than the max gap.
    pub async fn run_presence_sweep(&self) -> Result<TaskRun, RcError> {
        self.guarded(PRESENCE_SWEEP, || self.sweep_presence()).await
    }

    /// Reconcile running records against live state and the media engine.
    pub async fn run_drift_sweep(&self) -> Result<TaskRun, RcError> {
        self.guarded(DRIFT_SWEEP, || self.sweep_drift()).await
    }

    /// Delete backup/export artifacts older than the retention period.
    pub async fn run_artifact_cleanup(&self) -> Result<TaskRun, RcError> {
        self.guarded(ARTIFACT_CLEANUP, || self.cleanup_artifacts()).await
    }

    async fn guarded<F, Fut>(&self, task: &'static str, sweep: F) -> Result<TaskRun, RcError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<usize, RcError>>,
    {
        let key = keys::janitor_lock(task);
        let Some(handle) = self.lock.try_acquire(&key, self.config.task_lock_ttl).await? else {
            debug!(target: "rc.janitor", task, "Task lock held elsewhere, skipping");
            metrics::record_janitor_run(task, TaskOutcome::Skipped);
            return Ok(TaskRun::Skipped);
        };

        let result = sweep().await;

        if let Err(e) = self.lock.release(&handle).await {
            warn!(target: "rc.janitor", task, error = %e, "Failed to release task lock");
        }

        match result {
            Ok(affected) => {
                metrics::record_janitor_run(task, TaskOutcome::Success);
                Ok(TaskRun::Completed { affected })
            }
            Err(e) => {
                metrics::record_janitor_run(task, TaskOutcome::Error);
                Err(e)
            }
        }
    }

    async fn sweep_durations(&self) -> Result<usize, RcError> {
        let mut ended = 0;
        for entry in self.durations.expired().await? {
            let request = EndRoomRequest {
                room_id: entry.room_id.clone(),
                reason: EndReason::DurationExpired,
            };
            match self.coordinator.end_room(&request).await {
                Ok(()) => {
                    info!(
                        target: "rc.janitor",
                        room_id = %entry.room_id,
                        duration_minutes = entry.duration_minutes,
                        "Ended room past its duration"
                    );
                    ended += 1;
                }
                Err(RcError::RoomNotFound(_)) => {
                    // Orphaned entry for a room that already ended
                    if let Err(e) = self.durations.remove(&entry.room_id).await {
                        warn!(target: "rc.janitor", room_id = %entry.room_id, error = %e, "Failed to drop orphaned duration entry");
                    }
                }
                Err(e) => {
                    warn!(target: "rc.janitor", room_id = %entry.room_id, error = %e, "Failed to end expired room");
                }
            }
        }
        Ok(ended)
    }

    async fn sweep_presence(&self) -> Result<usize, RcError> {
        let now = self.clock.now_millis();
        let max_gap = duration_ms_i64(self.presence.config().max_ping_gap);
        let cleanup_after = max_gap.saturating_add(duration_ms_i64(self.presence.config().cleanup_grace));
        let mut affected = 0;

        for room_id in self.coordinator.active_room_ids().await? {
            let users = match self.presence.list_users(&room_id).await {
                Ok(users) => users,
                Err(e) => {
                    warn!(target: "rc.janitor", room_id = %room_id, error = %e, "Failed to list room users");
                    continue;
                }
            };

            for user in users {
                let gap = now.saturating_sub(user.last_ping_at);
                let result = match user.status {
                    UserStatus::Online | UserStatus::Disconnected if gap > max_gap => {
                        self.presence.force_offline(&room_id, &user.user_id).await
                    }
                    // Owner of the cleanup check may have died
                    UserStatus::Offline if gap > cleanup_after => {
                        self.presence.cleanup_user(&room_id, &user.user_id).await
                    }
                    _ => Ok(false),
                };

                match result {
                    Ok(true) => affected += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(target: "rc.janitor", room_id = %room_id, user_id = %user.user_id, error = %e, "Failed to expire stale user");
                    }
                }
            }
        }
        Ok(affected)
    }

    async fn sweep_drift(&self) -> Result<usize, RcError> {
        let mut affected = 0;
        for record in self.rooms.list_running().await? {
            match self.reconcile_room(&record).await {
                Ok(DriftAction::None) => {}
                Ok(action) => {
                    debug!(target: "rc.janitor", room_id = %record.room_id, ?action, "Drift corrected");
                    affected += 1;
                }
                Err(e) => {
                    warn!(target: "rc.janitor", room_id = %record.room_id, error = %e, "Failed to reconcile room");
                }
            }
        }
        Ok(affected)
    }

    async fn reconcile_room(&self, record: &RoomRecord) -> Result<DriftAction, RcError> {
        let room_id = record.room_id.as_str();
        let Some(entry) = self
            .coordinator
            .room_state(room_id)
            .await?
            .filter(|e| e.is_live())
        else {
            self.coordinator.heal(record, "drift_state_missing").await?;
            return Ok(DriftAction::MarkedNotRunning);
        };

        let media_reachable = match self.media.get_room(room_id).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                self.end(room_id, EndReason::Drift).await?;
                return Ok(DriftAction::Ended);
            }
            Err(e) => {
                warn!(target: "rc.janitor", room_id = %room_id, error = %e, "Media engine unreachable, skipping engine checks");
                false
            }
        };

        let users = self.presence.list_users(room_id).await?;
        let online = users.iter().filter(|u| u.status == UserStatus::Online).count();
        if online == 0 && entry.empty_timeout_seconds > 0 {
            let last_activity = users
                .iter()
                .map(|u| u.last_ping_at)
                .chain(std::iter::once(entry.started_at.unwrap_or(entry.created_at)))
                .max()
                .unwrap_or(entry.created_at);
            let idle = self.clock.now_millis().saturating_sub(last_activity);
            if idle > i64::from(entry.empty_timeout_seconds) * 1000 {
                self.end(room_id, EndReason::EmptyTimeout).await?;
                return Ok(DriftAction::Ended);
            }
        }

        if media_reachable {
            let participants = self.media.list_participants(room_id).await?;
            let count = i64::try_from(participants.len()).unwrap_or(i64::MAX);
            if count != record.joined_participants {
                debug!(
                    target: "rc.janitor",
                    room_id = %room_id,
                    recorded = record.joined_participants,
                    actual = count,
                    "Reconciling participant count"
                );
                self.rooms.set_participant_count(room_id, count).await?;
            }
        }

        Ok(DriftAction::None)
    }

    async fn end(&self, room_id: &str, reason: EndReason) -> Result<(), RcError> {
        info!(target: "rc.janitor", room_id = %room_id, reason = reason.as_str(), "Ending room");
        self.coordinator
            .end_room(&EndRoomRequest {
                room_id: room_id.to_string(),
                reason,
            })
            .await
    }

    async fn cleanup_artifacts(&self) -> Result<usize, RcError> {
        let Some(dir) = self.config.artifacts_dir.as_ref() else {
            return Ok(0);
        };

        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(target: "rc.janitor", dir = %dir.display(), "Artifacts directory missing");
                return Ok(0);
            }
            Err(e) => return Err(RcError::Internal(format!("Failed to read artifacts directory: {e}"))),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RcError::Internal(format!("Failed to read artifacts directory: {e}")))?
        {
            let path = entry.path();
            let modified = match entry.metadata().await {
                Ok(meta) if meta.is_file() => meta.modified(),
                Ok(_) => continue,
                Err(e) => Err(e),
            };
            let age = match modified {
                Ok(modified) => now.duration_since(modified).unwrap_or(Duration::ZERO),
                Err(e) => {
                    warn!(target: "rc.janitor", path = %path.display(), error = %e, "Failed to stat artifact");
                    continue;
                }
            };

            if age >= self.config.artifact_retention {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!(target: "rc.janitor", path = %path.display(), error = %e, "Failed to remove artifact");
                    }
                }
            }
        }

        if removed > 0 {
            info!(target: "rc.janitor", removed, "Removed expired artifacts");
        }
        Ok(removed)
    }
}

fn log_run(task: &'static str, result: Result<TaskRun, RcError>) {
    match result {
        Ok(TaskRun::Completed { affected }) if affected > 0 => {
            info!(target: "rc.janitor", task, affected, "Task completed");
        }
        Ok(_) => {}
        Err(e) => {
            error!(target: "rc.janitor", task, error = %e, "Task failed");
        }
    }
}
