//! Component wiring.
//!
//! [`RoomServices`] builds every component exactly once from injected
//! backends. The binary passes Redis, Postgres and the media engine client;
//! tests pass in-memory doubles.

use crate::agents::{AgentFactory, AgentSupervisor};
use crate::clock::Clock;
use crate::config::{AgentConfig, Config, JanitorConfig, LockConfig, PresenceConfig, RoomConfig};
use crate::janitor::{Janitor, JanitorDeps};
use crate::lock::{DistributedLock, RoomCreationLock};
use crate::presence::{PresenceDeps, PresenceTracker};
use crate::repositories::RoomRepository;
use crate::rooms::{CoordinatorDeps, DurationTracker, RoomCoordinator};
use crate::services::{Broadcaster, EventSink, MediaEngine, MessagingInfra};
use crate::store::SharedStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// External systems the control plane talks to.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn SharedStore>,
    pub rooms: Arc<dyn RoomRepository>,
    pub media: Arc<dyn MediaEngine>,
    pub events: Arc<dyn EventSink>,
    pub agent_factory: Arc<dyn AgentFactory>,
    pub clock: Arc<dyn Clock>,
}

/// Per-component configuration sections.
#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    pub locks: LockConfig,
    pub rooms: RoomConfig,
    pub presence: PresenceConfig,
    pub janitor: JanitorConfig,
    pub agents: AgentConfig,
}

impl From<&Config> for ServiceSettings {
    fn from(config: &Config) -> Self {
        Self {
            locks: config.locks.clone(),
            rooms: config.rooms.clone(),
            presence: config.presence.clone(),
            janitor: config.janitor.clone(),
            agents: config.agents.clone(),
        }
    }
}

/// Every component of one instance.
#[derive(Clone)]
pub struct RoomServices {
    pub lock: DistributedLock,
    pub creation_lock: RoomCreationLock,
    pub durations: DurationTracker,
    pub broadcaster: Broadcaster,
    pub messaging: MessagingInfra,
    pub coordinator: RoomCoordinator,
    pub presence: PresenceTracker,
    pub janitor: Janitor,
    pub agents: AgentSupervisor,
}

impl RoomServices {
    /// Build the component graph. Background work spawned by components runs
    /// on child tokens of `cancel`.
    pub fn new(backends: Backends, settings: ServiceSettings, cancel: &CancellationToken) -> Self {
        let lock = DistributedLock::new(Arc::clone(&backends.store));
        let creation_lock = RoomCreationLock::new(lock.clone(), settings.locks);
        let durations = DurationTracker::new(Arc::clone(&backends.store), Arc::clone(&backends.clock));
        let broadcaster = Broadcaster::new(Arc::clone(&backends.store));
        let messaging = MessagingInfra::new(Arc::clone(&backends.store));

        let agents = AgentSupervisor::new(
            lock.clone(),
            Arc::clone(&backends.agent_factory),
            settings.agents,
            cancel.child_token(),
        );

        let coordinator = RoomCoordinator::new(
            CoordinatorDeps {
                store: Arc::clone(&backends.store),
                rooms: Arc::clone(&backends.rooms),
                media: Arc::clone(&backends.media),
                events: Arc::clone(&backends.events),
                broadcaster: broadcaster.clone(),
                messaging: messaging.clone(),
                creation_lock: creation_lock.clone(),
                durations: durations.clone(),
                agents: agents.clone(),
                clock: Arc::clone(&backends.clock),
            },
            settings.rooms,
            cancel.child_token(),
        );

        let presence = PresenceTracker::new(
            PresenceDeps {
                store: Arc::clone(&backends.store),
                broadcaster: broadcaster.clone(),
                messaging: messaging.clone(),
                events: Arc::clone(&backends.events),
                clock: Arc::clone(&backends.clock),
            },
            settings.presence,
            cancel.child_token(),
        );

        let janitor = Janitor::new(
            JanitorDeps {
                coordinator: coordinator.clone(),
                presence: presence.clone(),
                durations: durations.clone(),
                rooms: Arc::clone(&backends.rooms),
                media: Arc::clone(&backends.media),
                lock: lock.clone(),
                clock: Arc::clone(&backends.clock),
            },
            settings.janitor,
        );

        Self {
            lock,
            creation_lock,
            durations,
            broadcaster,
            messaging,
            coordinator,
            presence,
            janitor,
            agents,
        }
    }
}
