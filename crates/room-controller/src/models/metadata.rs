//! Room metadata blob and the default feature/lock-setting policy.

use serde::{Deserialize, Serialize};

/// Room feature switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomFeatures {
    pub allow_webcams: bool,
    pub allow_screen_share: bool,
    pub allow_chat: bool,
    pub allow_recording: bool,
    pub allow_breakout_rooms: bool,
    pub mute_on_start: bool,
    /// Room duration in minutes; 0 means unlimited.
    pub duration_minutes: u64,
}

impl Default for RoomFeatures {
    fn default() -> Self {
        Self {
            allow_webcams: true,
            allow_screen_share: true,
            allow_chat: true,
            allow_recording: true,
            allow_breakout_rooms: true,
            mute_on_start: false,
            duration_minutes: 0,
        }
    }
}

/// Default lock settings applied to non-admin users on join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    pub lock_microphone: bool,
    pub lock_webcam: bool,
    pub lock_screen_sharing: bool,
    pub lock_chat: bool,
}

/// Metadata blob carried by the room state entry and sent to the media engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomMetadata {
    pub title: String,
    pub welcome_message: Option<String>,
    pub is_breakout_room: bool,
    pub parent_room_id: Option<String>,
    pub features: RoomFeatures,
    pub default_lock_settings: LockSettings,
}

impl RoomMetadata {
    /// Apply the default feature/lock-setting policy.
    ///
    /// - breakout rooms never record and never nest further breakouts
    /// - a disabled feature forces its lock on
    /// - `mute_on_start` locks the microphone
    /// - duration is clamped to `max_duration_minutes` (0 = unlimited)
    pub fn apply_default_policy(&mut self, max_duration_minutes: u64) {
        if self.parent_room_id.is_some() {
            self.is_breakout_room = true;
        }
        if self.is_breakout_room {
            self.features.allow_recording = false;
            self.features.allow_breakout_rooms = false;
        }

        let locks = &mut self.default_lock_settings;
        if !self.features.allow_webcams {
            locks.lock_webcam = true;
        }
        if !self.features.allow_screen_share {
            locks.lock_screen_sharing = true;
        }
        if !self.features.allow_chat {
            locks.lock_chat = true;
        }
        if self.features.mute_on_start {
            locks.lock_microphone = true;
        }

        if max_duration_minutes > 0
            && (self.features.duration_minutes == 0
                || self.features.duration_minutes > max_duration_minutes)
        {
            self.features.duration_minutes = max_duration_minutes;
        }
    }
}
