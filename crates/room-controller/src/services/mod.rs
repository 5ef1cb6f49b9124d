//! Collaborators the control plane drives.
//!
//! # Components
//!
//! - `media_engine` - media engine room API (trait + LiveKit client)
//! - `events` - webhook and analytics emission
//! - `broadcast` - room broadcast over the shared store
//! - `messaging` - per-room stream and per-user consumer bookkeeping

pub mod broadcast;
pub mod events;
pub mod media_engine;
pub mod messaging;

pub use broadcast::{BroadcastEnvelope, Broadcaster, RoomBroadcast};
pub use events::{AnalyticsEvent, EventSink, TracingEventSink, WebhookEvent};
pub use media_engine::{CreateMediaRoom, LiveKitClient, MediaEngine, MediaParticipant, MediaRoom};
pub use messaging::MessagingInfra;
