//! Room Controller Library
//!
//! Control plane for a video-conferencing deployment. Every instance of the
//! service runs the same components against shared backends:
//!
//! - a shared key/value store (Redis) for live room, user, duration and lock
//!   state
//! - a relational store (Postgres) for durable room records
//! - an external media engine that hosts the actual media rooms
//!
//! # Architecture
//!
//! ```text
//! API layer ──► RoomCoordinator ──► RoomCreationLock ──► DistributedLock
//!                    │     └──────► DurationTracker
//!                    ├──► SharedStore / RoomRepository / MediaEngine
//! heartbeats ──► PresenceTracker ──► Broadcaster / EventSink
//! Janitor (per instance, lock-deduplicated) ──► coordinator, presence, durations
//! AgentSupervisor ──► DistributedLock (one lease per room + service)
//! ```
//!
//! No in-process mutex is meaningful across instances. Cross-instance
//! coordination goes through [`lock::DistributedLock`] and the store's
//! atomic operations.
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-facing codes
//! - [`context`] - Construction of the component graph
//! - [`rooms`] - Room lifecycle coordinator and duration tracker
//! - [`presence`] - Per-user presence state machine
//! - [`janitor`] - Periodic lock-guarded maintenance
//! - [`agents`] - Leader-elected per-room workers

pub mod agents;
pub mod clock;
pub mod config;
pub mod context;
pub mod errors;
pub mod janitor;
pub mod lock;
pub mod models;
pub mod observability;
pub mod presence;
pub mod repositories;
pub mod rooms;
pub mod services;
pub mod store;
