//! In-memory shared store.
//!
//! One namespace for strings, hashes and sets, like Redis. String keys may
//! carry an expiry checked against the injected clock on every access.
//! Published messages are recorded for assertions.

use async_trait::async_trait;
use room_controller::clock::Clock;
use room_controller::errors::RcError;
use room_controller::services::BroadcastEnvelope;
use room_controller::store::{keys, SharedStore};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<i64>,
}

#[derive(Debug, Default)]
struct StoreInner {
    values: HashMap<String, StoredValue>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, BTreeSet<String>>,
    published: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreInner>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner::default())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every operation fail with `RcError::Store` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Drop a key immediately, as if its TTL had elapsed.
    pub fn expire_now(&self, key: &str) {
        self.inner.lock().unwrap().values.remove(key);
    }

    /// Remaining TTL of a string key, if it has one.
    #[must_use]
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().unwrap();
        purge_if_expired(&mut inner, key, now);
        inner
            .values
            .get(key)
            .and_then(|v| v.expires_at)
            .map(|at| Duration::from_millis(u64::try_from(at - now).unwrap_or(0)))
    }

    /// Every `(channel, payload)` published so far.
    #[must_use]
    pub fn published(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().published.clone()
    }

    /// Decoded broadcasts published to one room, in order.
    #[must_use]
    pub fn broadcasts(&self, room_id: &str) -> Vec<BroadcastEnvelope> {
        let channel = keys::room_events_channel(room_id);
        self.published()
            .into_iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, payload)| serde_json::from_str(&payload).unwrap())
            .collect()
    }

    fn check_available(&self) -> Result<(), RcError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RcError::Store("store unavailable".to_string()));
        }
        Ok(())
    }

    fn with_inner<T>(&self, key: &str, f: impl FnOnce(&mut StoreInner) -> T) -> Result<T, RcError> {
        self.check_available()?;
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock().unwrap();
        purge_if_expired(&mut inner, key, now);
        Ok(f(&mut inner))
    }

    fn expiry(&self, ttl: Duration) -> i64 {
        self.clock.now_millis() + i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
    }
}

fn purge_if_expired(inner: &mut StoreInner, key: &str, now: i64) {
    let expired = inner
        .values
        .get(key)
        .and_then(|v| v.expires_at)
        .is_some_and(|at| at <= now);
    if expired {
        inner.values.remove(key);
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, RcError> {
        self.with_inner(key, |inner| inner.values.get(key).map(|v| v.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), RcError> {
        let expires_at = ttl.map(|ttl| self.expiry(ttl));
        self.with_inner(key, |inner| {
            inner.values.insert(
                key.to_string(),
                StoredValue {
                    value: value.to_string(),
                    expires_at,
                },
            );
        })
    }

    async fn delete(&self, key: &str) -> Result<bool, RcError> {
        self.with_inner(key, |inner| {
            let value = inner.values.remove(key).is_some();
            let hash = inner.hashes.remove(key).is_some();
            let set = inner.sets.remove(key).is_some();
            value || hash || set
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, RcError> {
        self.with_inner(key, |inner| {
            inner.values.contains_key(key)
                || inner.hashes.get(key).is_some_and(|h| !h.is_empty())
                || inner.sets.get(key).is_some_and(|s| !s.is_empty())
        })
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<(), RcError> {
        self.with_inner(key, |inner| {
            inner
                .hashes
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
        })
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, RcError> {
        self.with_inner(key, |inner| {
            inner.hashes.get(key).and_then(|h| h.get(field)).cloned()
        })
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, RcError> {
        self.with_inner(key, |inner| inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<bool, RcError> {
        self.with_inner(key, |inner| {
            inner
                .hashes
                .get_mut(key)
                .is_some_and(|h| h.remove(field).is_some())
        })
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), RcError> {
        self.with_inner(key, |inner| {
            inner
                .sets
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string());
        })
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, RcError> {
        self.with_inner(key, |inner| {
            inner.sets.get_mut(key).is_some_and(|s| s.remove(member))
        })
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, RcError> {
        self.with_inner(key, |inner| {
            inner
                .sets
                .get(key)
                .map(|s| s.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    async fn acquire_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, RcError> {
        let expires_at = Some(self.expiry(ttl));
        self.with_inner(key, |inner| {
            if inner.values.contains_key(key) {
                return false;
            }
            inner.values.insert(
                key.to_string(),
                StoredValue {
                    value: token.to_string(),
                    expires_at,
                },
            );
            true
        })
    }

    async fn refresh_lock(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, RcError> {
        let expires_at = Some(self.expiry(ttl));
        self.with_inner(key, |inner| match inner.values.get_mut(key) {
            Some(stored) if stored.value == token => {
                stored.expires_at = expires_at;
                true
            }
            _ => false,
        })
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, RcError> {
        self.with_inner(key, |inner| {
            let held = inner.values.get(key).is_some_and(|v| v.value == token);
            if held {
                inner.values.remove(key);
            }
            held
        })
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), RcError> {
        self.with_inner(channel, |inner| {
            inner
                .published
                .push((channel.to_string(), payload.to_string()));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ManualClock;

    #[tokio::test]
    async fn test_values_expire_against_clock() {
        let clock = Arc::new(ManualClock::new());
        let store = InMemoryStore::new(clock.clone());

        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_without_ttl_clears_expiry() {
        let clock = Arc::new(ManualClock::new());
        let store = InMemoryStore::new(clock.clone());

        store
            .set("k", "v1", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        store.set("k", "v2", None).await.unwrap();

        clock.advance(Duration::from_secs(5));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_lock_token_checks() {
        let clock = Arc::new(ManualClock::new());
        let store = InMemoryStore::new(clock.clone());
        let ttl = Duration::from_secs(5);

        assert!(store.acquire_lock("l", "a", ttl).await.unwrap());
        assert!(!store.acquire_lock("l", "b", ttl).await.unwrap());
        assert!(!store.refresh_lock("l", "b", ttl).await.unwrap());
        assert!(!store.release_lock("l", "b").await.unwrap());

        clock.advance(ttl);
        assert!(store.acquire_lock("l", "b", ttl).await.unwrap());
        assert!(!store.release_lock("l", "a").await.unwrap());
        assert!(store.release_lock("l", "b").await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = InMemoryStore::new(Arc::new(ManualClock::new()));
        store.set_unavailable(true);
        assert!(matches!(store.get("k").await, Err(RcError::Store(_))));
    }
}
