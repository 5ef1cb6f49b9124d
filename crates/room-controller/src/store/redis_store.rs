//! Redis implementation of [`SharedStore`].
//!
//! # Connection Pattern
//!
//! `redis::aio::ConnectionManager` multiplexes one connection and reconnects
//! on failure. It is cheap to clone and safe for concurrent use, so every
//! operation clones it instead of sharing via `Arc<Mutex>`.
//!
//! # Usage
//!
//! ```rust,ignore
//! let store = RedisStore::connect("redis://localhost:6379").await?;
//! let acquired = store.acquire_lock("rc:lock:room_creation:room01", &token, ttl).await?;
//! ```

use super::{lua_scripts, ttl_millis, SharedStore};
use crate::errors::RcError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError, Script};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, warn};

/// Redis-backed shared store.
///
/// Cheaply cloneable; each clone shares the same managed connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    refresh_lock_script: Script,
    release_lock_script: Script,
}

/// Log a failed operation and convert it to `RcError::Store`.
fn store_error<'a>(operation: &'static str, key: &'a str) -> impl FnOnce(RedisError) -> RcError + 'a {
    move |e| {
        warn!(
            target: "rc.store.redis",
            error = %e,
            key = %key,
            operation,
            "Redis operation failed"
        );
        RcError::Store(format!("{operation} failed: {e}"))
    }
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `RcError::Store` if the URL is invalid or the connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, RcError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Do NOT log redis_url as it may contain credentials
            error!(
                target: "rc.store.redis",
                error = %e,
                "Failed to open Redis client"
            );
            RcError::Store(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = ConnectionManager::new(client).await.map_err(|e| {
            error!(
                target: "rc.store.redis",
                error = %e,
                "Failed to connect to Redis"
            );
            RcError::Store(format!("Failed to connect to Redis: {e}"))
        })?;

        Ok(Self {
            connection,
            refresh_lock_script: Script::new(lua_scripts::REFRESH_LOCK),
            release_lock_script: Script::new(lua_scripts::RELEASE_LOCK),
        })
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RcError> {
        let mut conn = self.connection.clone();
        conn.get(key).await.map_err(store_error("GET", key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), RcError> {
        let mut conn = self.connection.clone();
        match ttl {
            Some(ttl) => conn
                .pset_ex(key, value, ttl_millis(ttl))
                .await
                .map_err(store_error("PSETEX", key)),
            None => conn.set(key, value).await.map_err(store_error("SET", key)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, RcError> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn.del(key).await.map_err(store_error("DEL", key))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, RcError> {
        let mut conn = self.connection.clone();
        conn.exists(key).await.map_err(store_error("EXISTS", key))
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), RcError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .hset(key, field, value)
            .await
            .map_err(store_error("HSET", key))?;
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, RcError> {
        let mut conn = self.connection.clone();
        conn.hget(key, field).await.map_err(store_error("HGET", key))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, RcError> {
        let mut conn = self.connection.clone();
        conn.hgetall(key).await.map_err(store_error("HGETALL", key))
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, RcError> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn
            .hdel(key, field)
            .await
            .map_err(store_error("HDEL", key))?;
        Ok(removed > 0)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), RcError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .sadd(key, member)
            .await
            .map_err(store_error("SADD", key))?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, RcError> {
        let mut conn = self.connection.clone();
        let removed: i64 = conn
            .srem(key, member)
            .await
            .map_err(store_error("SREM", key))?;
        Ok(removed > 0)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, RcError> {
        let mut conn = self.connection.clone();
        conn.smembers(key)
            .await
            .map_err(store_error("SMEMBERS", key))
    }

    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, RcError> {
        let mut conn = self.connection.clone();
        // SET NX replies nil when the key already exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(store_error("SET NX", key))?;
        Ok(reply.is_some())
    }

    async fn refresh_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, RcError> {
        let mut conn = self.connection.clone();
        let result: i64 = self
            .refresh_lock_script
            .key(key)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(store_error("REFRESH_LOCK", key))?;
        Ok(result == 1)
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, RcError> {
        let mut conn = self.connection.clone();
        let result: i64 = self
            .release_lock_script
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(store_error("RELEASE_LOCK", key))?;
        Ok(result == 1)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), RcError> {
        let mut conn = self.connection.clone();
        let _: i64 = conn
            .publish(channel, payload)
            .await
            .map_err(store_error("PUBLISH", channel))?;
        Ok(())
    }
}
