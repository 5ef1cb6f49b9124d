//! In-memory room repository.

use async_trait::async_trait;
use chrono::Utc;
use room_controller::errors::RcError;
use room_controller::models::{NewRoomRecord, RoomRecord};
use room_controller::repositories::RoomRepository;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct RepositoryInner {
    rows: HashMap<String, RoomRecord>,
    next_id: i64,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRoomRepository {
    inner: Arc<Mutex<RepositoryInner>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryRoomRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `RcError::Database` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Current row, bypassing the trait.
    #[must_use]
    pub fn row(&self, room_id: &str) -> Option<RoomRecord> {
        self.inner.lock().unwrap().rows.get(room_id).cloned()
    }

    /// Insert a row directly (e.g. a stale running row left by a crash).
    pub fn seed_running(&self, room_id: &str, sid: &str) -> RoomRecord {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let record = RoomRecord {
            id: inner.next_id,
            room_id: room_id.to_string(),
            sid: sid.to_string(),
            title: room_id.to_string(),
            is_running: true,
            created_at: Utc::now(),
            ended_at: None,
            joined_participants: 0,
            is_breakout_room: false,
            parent_room_id: None,
            webhook_url: None,
        };
        inner.rows.insert(room_id.to_string(), record.clone());
        record
    }

    fn check_available(&self) -> Result<(), RcError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RcError::Database("database unavailable".to_string()));
        }
        Ok(())
    }

    fn update(&self, room_id: &str, f: impl FnOnce(&mut RoomRecord)) -> Result<bool, RcError> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.rows.get_mut(room_id).map(f).is_some())
    }
}

#[async_trait]
impl RoomRepository for InMemoryRoomRepository {
    async fn find_by_room_id(&self, room_id: &str) -> Result<Option<RoomRecord>, RcError> {
        self.check_available()?;
        Ok(self.row(room_id))
    }

    async fn upsert_running(&self, record: &NewRoomRecord) -> Result<RoomRecord, RcError> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        let id = match inner.rows.get(&record.room_id) {
            Some(existing) => existing.id,
            None => {
                inner.next_id += 1;
                inner.next_id
            }
        };
        let row = RoomRecord {
            id,
            room_id: record.room_id.clone(),
            sid: record.sid.clone(),
            title: record.title.clone(),
            is_running: true,
            created_at: Utc::now(),
            ended_at: None,
            joined_participants: 0,
            is_breakout_room: record.is_breakout_room,
            parent_room_id: record.parent_room_id.clone(),
            webhook_url: record.webhook_url.clone(),
        };
        inner.rows.insert(record.room_id.clone(), row.clone());
        Ok(row)
    }

    async fn mark_ended(&self, room_id: &str) -> Result<bool, RcError> {
        self.check_available()?;
        let mut inner = self.inner.lock().unwrap();
        match inner.rows.get_mut(room_id) {
            Some(row) if row.is_running => {
                row.is_running = false;
                row.ended_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_running(&self) -> Result<Vec<RoomRecord>, RcError> {
        self.check_available()?;
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<RoomRecord> = inner
            .rows
            .values()
            .filter(|r| r.is_running)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        Ok(rows)
    }

    async fn increment_participants(&self, room_id: &str) -> Result<(), RcError> {
        self.update(room_id, |row| row.joined_participants += 1)?;
        Ok(())
    }

    async fn decrement_participants(&self, room_id: &str) -> Result<(), RcError> {
        self.update(room_id, |row| {
            row.joined_participants = (row.joined_participants - 1).max(0);
        })?;
        Ok(())
    }

    async fn set_participant_count(&self, room_id: &str, count: i64) -> Result<(), RcError> {
        self.update(room_id, |row| row.joined_participants = count.max(0))?;
        Ok(())
    }
}
