//! Room lifecycle: duration tracking and the coordinator.

mod coordinator;
mod duration;

pub use coordinator::{CoordinatorDeps, RoomCoordinator};
pub use duration::DurationTracker;
