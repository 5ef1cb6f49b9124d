//! Fully wired `RoomServices` over in-memory backends.
//!
//! [`TestHarness::peer`] builds a second instance on the same backends, for
//! tests that need two processes racing for the same lock.

use crate::{InMemoryRoomRepository, InMemoryStore, ManualClock, MockAgentFactory, MockMediaEngine, RecordingEventSink};
use room_controller::config::{AgentConfig, JanitorConfig, LockConfig, PresenceConfig, RoomConfig};
use room_controller::context::{Backends, RoomServices, ServiceSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Settings with short lock polling and production grace windows.
#[must_use]
pub fn test_settings() -> ServiceSettings {
    ServiceSettings {
        locks: LockConfig {
            room_lock_ttl: Duration::from_secs(10),
            poll_interval: Duration::from_millis(20),
            max_wait: Duration::from_secs(2),
        },
        rooms: RoomConfig::default(),
        presence: PresenceConfig {
            offline_grace: Duration::from_secs(5),
            cleanup_grace: Duration::from_secs(30),
            max_ping_gap: Duration::from_secs(60),
        },
        janitor: JanitorConfig::default(),
        agents: AgentConfig {
            lease_ttl: Duration::from_secs(30),
            refresh_interval: Duration::from_secs(10),
        },
    }
}

pub struct TestHarness {
    pub clock: Arc<ManualClock>,
    pub store: InMemoryStore,
    pub rooms: InMemoryRoomRepository,
    pub media: MockMediaEngine,
    pub events: RecordingEventSink,
    pub agent_factory: MockAgentFactory,
    pub settings: ServiceSettings,
    pub services: RoomServices,
    pub cancel: CancellationToken,
}

impl TestHarness {
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    #[must_use]
    pub fn with_settings(settings: ServiceSettings) -> Self {
        Self::build(settings, MockMediaEngine::new())
    }

    #[must_use]
    pub fn build(settings: ServiceSettings, media: MockMediaEngine) -> Self {
        let clock = Arc::new(ManualClock::new());
        let store = InMemoryStore::new(clock.clone());
        let rooms = InMemoryRoomRepository::new();
        let events = RecordingEventSink::new();
        let agent_factory = MockAgentFactory::new();
        let cancel = CancellationToken::new();

        let services = RoomServices::new(
            Backends {
                store: Arc::new(store.clone()),
                rooms: Arc::new(rooms.clone()),
                media: Arc::new(media.clone()),
                events: Arc::new(events.clone()),
                agent_factory: Arc::new(agent_factory.clone()),
                clock: clock.clone(),
            },
            settings.clone(),
            &cancel,
        );

        Self {
            clock,
            store,
            rooms,
            media,
            events,
            agent_factory,
            settings,
            services,
            cancel,
        }
    }

    /// Another instance sharing this harness's backends and clock.
    #[must_use]
    pub fn peer(&self) -> RoomServices {
        RoomServices::new(
            Backends {
                store: Arc::new(self.store.clone()),
                rooms: Arc::new(self.rooms.clone()),
                media: Arc::new(self.media.clone()),
                events: Arc::new(self.events.clone()),
                agent_factory: Arc::new(self.agent_factory.clone()),
                clock: self.clock.clone(),
            },
            self.settings.clone(),
            &self.cancel,
        )
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
