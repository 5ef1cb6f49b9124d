//! # Room Controller Test Utilities
//!
//! In-memory doubles for every backend the Room Controller talks to, plus
//! a harness that wires a full `RoomServices` over them.
//!
//! ## Modules
//!
//! - `clock` - `ManualClock` following tokio's (pausable) time
//! - `mock_store` - `InMemoryStore` with TTLs and recorded publishes
//! - `mock_repository` - `InMemoryRoomRepository`
//! - `mock_media` - `MockMediaEngine` with injectable failures
//! - `mock_events` - `RecordingEventSink`
//! - `mock_agents` - `MockAgentFactory` building recording workers
//! - `harness` - `TestHarness`
//! - `fixtures` - request builders and presence entries
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let h = TestHarness::new();
//!     let room = TestRoom::new("room-1").with_duration_minutes(30);
//!
//!     let info = h.services.coordinator.create_room(&room.request()).await.unwrap();
//!     assert!(h.media.has_room(&info.room_id));
//! }
//! ```

pub mod clock;
pub mod fixtures;
pub mod harness;
pub mod mock_agents;
pub mod mock_events;
pub mod mock_media;
pub mod mock_repository;
pub mod mock_store;

pub use clock::*;
pub use fixtures::*;
pub use harness::*;
pub use mock_agents::*;
pub use mock_events::*;
pub use mock_media::*;
pub use mock_repository::*;
pub use mock_store::*;
