//! Shared store abstraction.
//!
//! The shared store is the TTL-capable key-value + publish/subscribe substrate
//! used for ephemeral coordination state. Every instance talks to the same
//! store; nothing in here is instance-local.
//!
//! # Lock primitives
//!
//! `acquire_lock` is a single atomic set-if-absent-or-expired. `refresh_lock`
//! and `release_lock` only act when the stored value equals the presented
//! token, so a stale holder cannot disturb a new one.
//!
//! # Consistency
//!
//! Plain writes are last-write-wins. There is no version or compare-and-swap
//! guard on entries other than locks.

pub mod keys;
pub mod lua_scripts;
mod redis_store;

pub use redis_store::RedisStore;

use crate::errors::RcError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Operations the control plane needs from the shared store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, RcError>;

    /// Write a value, optionally expiring after `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), RcError>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> Result<bool, RcError>;

    async fn exists(&self, key: &str) -> Result<bool, RcError>;

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), RcError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, RcError>;

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, RcError>;

    /// Returns whether the field existed.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, RcError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), RcError>;

    /// Returns whether the member existed.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, RcError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, RcError>;

    /// Atomically store `token` under `key` if the key is absent or expired.
    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, RcError>;

    /// Extend the TTL only if `key` currently holds `token`.
    async fn refresh_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, RcError>;

    /// Delete `key` only if it currently holds `token`.
    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, RcError>;

    /// Publish a message on a channel.
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), RcError>;
}

/// Read and decode a JSON value.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn SharedStore,
    key: &str,
) -> Result<Option<T>, RcError> {
    match store.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub async fn set_json<T: Serialize + Sync>(
    store: &dyn SharedStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> Result<(), RcError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw, ttl).await
}

/// Read and decode a JSON hash field.
pub async fn hash_get_json<T: DeserializeOwned>(
    store: &dyn SharedStore,
    key: &str,
    field: &str,
) -> Result<Option<T>, RcError> {
    match store.hash_get(key, field).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

/// Encode and write a JSON hash field.
pub async fn hash_set_json<T: Serialize + Sync>(
    store: &dyn SharedStore,
    key: &str,
    field: &str,
    value: &T,
) -> Result<(), RcError> {
    let raw = serde_json::to_string(value)?;
    store.hash_set(key, field, &raw).await
}

/// Decode every field of a JSON hash, skipping (and logging) undecodable ones.
pub async fn hash_values_json<T: DeserializeOwned>(
    store: &dyn SharedStore,
    key: &str,
) -> Result<Vec<T>, RcError> {
    let raw = store.hash_get_all(key).await?;
    let mut values = Vec::with_capacity(raw.len());
    for (field, value) in raw {
        match serde_json::from_str(&value) {
            Ok(decoded) => values.push(decoded),
            Err(e) => {
                tracing::warn!(
                    target: "rc.store",
                    key = %key,
                    field = %field,
                    error = %e,
                    "Skipping undecodable hash field"
                );
            }
        }
    }
    Ok(values)
}

/// Convert a TTL to whole milliseconds for the store (minimum 1ms).
#[must_use]
pub fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}
