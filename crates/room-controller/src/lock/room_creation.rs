//! Room-creation lock helpers.
//!
//! Both helpers poll at `LockConfig::poll_interval` and give up after
//! `LockConfig::max_wait`. Polling honours the cancellation token between
//! attempts; nothing is held while sleeping.

use super::{DistributedLock, LockHandle};
use crate::clock::duration_ms;
use crate::config::LockConfig;
use crate::errors::RcError;
use crate::store::keys;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Serializes creation and end of a single room across instances.
#[derive(Clone)]
pub struct RoomCreationLock {
    lock: DistributedLock,
    config: LockConfig,
}

impl RoomCreationLock {
    pub fn new(lock: DistributedLock, config: LockConfig) -> Self {
        Self { lock, config }
    }

    /// Poll `try_acquire` until acquired, `max_wait` elapses or `cancel` fires.
    ///
    /// # Errors
    ///
    /// - `RcError::LockTimeout` when `max_wait` elapses
    /// - `RcError::Cancelled` when the token is cancelled while waiting
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn acquire_with_retry(
        &self,
        room_id: &str,
        cancel: &CancellationToken,
    ) -> Result<LockHandle, RcError> {
        let key = keys::room_creation_lock(room_id);
        let deadline = Instant::now() + self.config.max_wait;
        let mut attempts: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(RcError::Cancelled);
            }

            attempts += 1;
            if let Some(handle) = self
                .lock
                .try_acquire(&key, self.config.room_lock_ttl)
                .await?
            {
                if attempts > 1 {
                    debug!(target: "rc.lock", room_id = %room_id, attempts, "Room creation lock acquired after retry");
                }
                return Ok(handle);
            }

            if Instant::now() >= deadline {
                warn!(
                    target: "rc.lock",
                    room_id = %room_id,
                    attempts,
                    max_wait_ms = duration_ms(self.config.max_wait),
                    "Timed out acquiring room creation lock"
                );
                return Err(RcError::LockTimeout(room_id.to_string()));
            }

            self.pause(cancel).await?;
        }
    }

    /// Wait until no creation is in flight for `room_id`.
    ///
    /// Checks existence only; never acquires.
    ///
    /// # Errors
    ///
    /// - `RcError::LockTimeout` when the lock is still present after `max_wait`
    /// - `RcError::Cancelled` when the token is cancelled while waiting
    #[instrument(skip_all, fields(room_id = %room_id))]
    pub async fn wait_until_complete(
        &self,
        room_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), RcError> {
        let key = keys::room_creation_lock(room_id);
        let deadline = Instant::now() + self.config.max_wait;

        loop {
            if cancel.is_cancelled() {
                return Err(RcError::Cancelled);
            }

            if !self.lock.is_locked(&key).await? {
                return Ok(());
            }

            if Instant::now() >= deadline {
                warn!(
                    target: "rc.lock",
                    room_id = %room_id,
                    "Timed out waiting for in-flight room creation"
                );
                return Err(RcError::LockTimeout(room_id.to_string()));
            }

            self.pause(cancel).await?;
        }
    }

    /// Release the room-creation lock.
    ///
    /// A lock that already expired is logged and ignored.
    pub async fn release(&self, handle: &LockHandle) {
        match self.lock.release(handle).await {
            Ok(()) => {}
            Err(RcError::LockNotHeld(key)) => {
                warn!(target: "rc.lock", key = %key, "Room creation lock expired before release");
            }
            Err(e) => {
                warn!(target: "rc.lock", key = %handle.key(), error = %e, "Failed to release room creation lock");
            }
        }
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), RcError> {
        tokio::select! {
            () = tokio::time::sleep(self.config.poll_interval) => Ok(()),
            () = cancel.cancelled() => Err(RcError::Cancelled),
        }
    }
}
