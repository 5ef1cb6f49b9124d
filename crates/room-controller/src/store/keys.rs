//! Shared store key layout.
//!
//! - `rc:room:{id}:state` - room state entry (JSON)
//! - `rc:room:{id}:users` - user state entries (HASH user_id -> JSON)
//! - `rc:rooms:active` - SET of room IDs with a live state entry
//! - `rc:rooms:durations` - duration entries (HASH room_id -> JSON)
//! - `rc:lock:*` - lock entries (value = owner token, PX expiry)
//! - `rc:msg:room:{id}` / `rc:msg:room:{id}:consumers` - messaging bookkeeping
//! - `rc:events:room:{id}` - broadcast channel

pub fn room_state(room_id: &str) -> String {
    format!("rc:room:{room_id}:state")
}

pub fn room_users(room_id: &str) -> String {
    format!("rc:room:{room_id}:users")
}

pub fn active_rooms() -> &'static str {
    "rc:rooms:active"
}

pub fn durations() -> &'static str {
    "rc:rooms:durations"
}

pub fn room_creation_lock(room_id: &str) -> String {
    format!("rc:lock:room_creation:{room_id}")
}

pub fn janitor_lock(task: &str) -> String {
    format!("rc:lock:janitor:{task}")
}

pub fn agent_lock(room_id: &str, service: &str) -> String {
    format!("rc:lock:agent:{room_id}:{service}")
}

pub fn room_stream(room_id: &str) -> String {
    format!("rc:msg:room:{room_id}")
}

pub fn room_consumers(room_id: &str) -> String {
    format!("rc:msg:room:{room_id}:consumers")
}

pub fn room_events_channel(room_id: &str) -> String {
    format!("rc:events:room:{room_id}")
}
