//! Distributed lock over the shared store.
//!
//! A lock is a store key whose value is a random owner token and whose expiry
//! is the lock TTL. Acquisition is one atomic set-if-absent; refresh and
//! release are token-checked, so a caller presenting a stale or foreign token
//! fails without touching the current holder.
//!
//! There is no queueing. A failed [`DistributedLock::try_acquire`] returns
//! `Ok(None)` immediately and the caller owns any retry policy. The
//! [`RoomCreationLock`] helpers add bounded polling on top.

mod room_creation;

pub use room_creation::RoomCreationLock;

use crate::errors::RcError;
use crate::observability::metrics;
use crate::store::{ttl_millis, SharedStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Proof of ownership returned by a successful acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    key: String,
    token: String,
}

impl LockHandle {
    /// Store key of the lock.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Owner token presented on refresh and release.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

/// TTL'd, tokenized mutual exclusion.
#[derive(Clone)]
pub struct DistributedLock {
    store: Arc<dyn SharedStore>,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self { store }
    }

    /// Try to take `key` for `ttl`.
    ///
    /// Returns `Ok(None)` when another holder owns an unexpired lock.
    #[instrument(skip_all, fields(key = %key))]
    pub async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockHandle>, RcError> {
        let token = Uuid::new_v4().to_string();
        let acquired = self.store.acquire_lock(key, &token, ttl).await?;
        metrics::record_lock_acquire(lock_kind(key), acquired);

        if acquired {
            debug!(target: "rc.lock", key = %key, ttl_ms = ttl_millis(ttl), "Lock acquired");
            Ok(Some(LockHandle {
                key: key.to_string(),
                token,
            }))
        } else {
            debug!(target: "rc.lock", key = %key, "Lock held elsewhere");
            Ok(None)
        }
    }

    /// Extend the lock's TTL.
    ///
    /// # Errors
    ///
    /// `RcError::LockNotHeld` if the lock expired or now belongs to someone else.
    #[instrument(skip_all, fields(key = %handle.key))]
    pub async fn refresh(&self, handle: &LockHandle, ttl: Duration) -> Result<(), RcError> {
        if self
            .store
            .refresh_lock(&handle.key, &handle.token, ttl)
            .await?
        {
            Ok(())
        } else {
            warn!(target: "rc.lock", key = %handle.key, "Refresh rejected, lock not held");
            Err(RcError::LockNotHeld(handle.key.clone()))
        }
    }

    /// Release the lock.
    ///
    /// # Errors
    ///
    /// `RcError::LockNotHeld` if the lock expired or now belongs to someone else.
    #[instrument(skip_all, fields(key = %handle.key))]
    pub async fn release(&self, handle: &LockHandle) -> Result<(), RcError> {
        if self.store.release_lock(&handle.key, &handle.token).await? {
            debug!(target: "rc.lock", key = %handle.key, "Lock released");
            Ok(())
        } else {
            debug!(target: "rc.lock", key = %handle.key, "Release skipped, lock not held");
            Err(RcError::LockNotHeld(handle.key.clone()))
        }
    }

    /// Whether anyone currently holds `key`. Does not acquire.
    pub async fn is_locked(&self, key: &str) -> Result<bool, RcError> {
        self.store.exists(key).await
    }
}

/// Metric label derived from the key layout (`rc:lock:{kind}:...`).
fn lock_kind(key: &str) -> &'static str {
    match key.split(':').nth(2) {
        Some("room_creation") => "room_creation",
        Some("janitor") => "janitor",
        Some("agent") => "agent",
        _ => "other",
    }
}
