//! Mock media engine.
//!
//! Keeps rooms in memory and counts calls. Failures and latency can be
//! injected per operation.

use async_trait::async_trait;
use room_controller::errors::RcError;
use room_controller::services::{CreateMediaRoom, MediaEngine, MediaParticipant, MediaRoom};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Default)]
struct MediaInner {
    rooms: HashMap<String, MediaRoom>,
    participants: HashMap<String, Vec<MediaParticipant>>,
    create_requests: Vec<CreateMediaRoom>,
    deleted: Vec<String>,
    create_delay: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct MockMediaEngine {
    inner: Arc<Mutex<MediaInner>>,
    fail_create: Arc<AtomicBool>,
    fail_get: Arc<AtomicBool>,
    fail_delete: Arc<AtomicBool>,
    next_sid: Arc<AtomicUsize>,
}

impl MockMediaEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every `create_room` call.
    #[must_use]
    pub fn with_create_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().create_delay = Some(delay);
        self
    }

    pub fn set_fail_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    /// Drop a room as if the engine had lost it.
    pub fn forget_room(&self, name: &str) {
        self.inner.lock().unwrap().rooms.remove(name);
    }

    pub fn add_participant(&self, room: &str, identity: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .participants
            .entry(room.to_string())
            .or_default()
            .push(MediaParticipant {
                sid: format!("PA_{identity}"),
                identity: identity.to_string(),
                name: identity.to_string(),
            });
        if let Some(room) = inner.rooms.get_mut(room) {
            room.num_participants += 1;
        }
    }

    #[must_use]
    pub fn has_room(&self, name: &str) -> bool {
        self.inner.lock().unwrap().rooms.contains_key(name)
    }

    /// Engine-side sid of the room, as its webhooks would carry it.
    ///
    /// # Panics
    ///
    /// If the engine has no room by that name.
    #[must_use]
    pub fn sid_of(&self, name: &str) -> String {
        self.inner
            .lock()
            .unwrap()
            .rooms
            .get(name)
            .map(|r| r.sid.clone())
            .unwrap_or_else(|| panic!("no media room named {name}"))
    }

    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.inner.lock().unwrap().create_requests.len()
    }

    #[must_use]
    pub fn last_create_request(&self) -> Option<CreateMediaRoom> {
        self.inner.lock().unwrap().create_requests.last().cloned()
    }

    /// Names passed to `delete_room`, in order.
    #[must_use]
    pub fn deleted_rooms(&self) -> Vec<String> {
        self.inner.lock().unwrap().deleted.clone()
    }
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_room(&self, request: &CreateMediaRoom) -> Result<MediaRoom, RcError> {
        let delay = {
            let mut inner = self.inner.lock().unwrap();
            inner.create_requests.push(request.clone());
            inner.create_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RcError::MediaEngine("create_room failed".to_string()));
        }

        let n = self.next_sid.fetch_add(1, Ordering::SeqCst) + 1;
        let room = MediaRoom {
            sid: format!("MR_{n}"),
            name: request.name.clone(),
            num_participants: 0,
        };
        self.inner
            .lock()
            .unwrap()
            .rooms
            .insert(request.name.clone(), room.clone());
        Ok(room)
    }

    async fn delete_room(&self, name: &str) -> Result<(), RcError> {
        let mut inner = self.inner.lock().unwrap();
        inner.deleted.push(name.to_string());
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(RcError::MediaEngine("delete_room failed".to_string()));
        }
        inner.rooms.remove(name);
        inner.participants.remove(name);
        Ok(())
    }

    async fn list_participants(&self, name: &str) -> Result<Vec<MediaParticipant>, RcError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .participants
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_room(&self, name: &str) -> Result<Option<MediaRoom>, RcError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(RcError::MediaEngine("get_room failed".to_string()));
        }
        Ok(self.inner.lock().unwrap().rooms.get(name).cloned())
    }
}
