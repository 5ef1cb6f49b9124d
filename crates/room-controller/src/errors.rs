//! Room Controller error types.
//!
//! Errors map to coarse client-facing codes via [`RcError::error_code`].
//! Internal details are logged server-side but not exposed to clients.

use thiserror::Error;

/// Room Controller error type.
///
/// Maps to client error codes:
/// - `RoomNotFound`, `UserNotFound`: `NOT_FOUND` (4)
/// - Store, Database, Serialization, Config, Internal, `LockNotHeld`: `INTERNAL_ERROR` (6)
/// - `LockTimeout`: `TIMEOUT` (8)
/// - `MediaEngine`, `AgentUnavailable`, `Cancelled`: `UNAVAILABLE` (9)
/// - `InconsistentState`: `CONFLICT` (5)
#[derive(Debug, Error)]
pub enum RcError {
    /// A room-creation lock (or completion wait) exceeded its maximum wait.
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Refresh or release presented a token that does not own the lock.
    #[error("Lock not held: {0}")]
    LockNotHeld(String),

    /// Room absent from the durable or ephemeral store.
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// User absent from the room's presence state.
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Durable store and ephemeral store/media engine disagree.
    ///
    /// Self-healed on read paths; only surfaced where healing is impossible.
    #[error("Inconsistent state: {0}")]
    InconsistentState(String),

    /// Media engine call failed.
    #[error("Media engine error: {0}")]
    MediaEngine(String),

    /// Shared store operation failed.
    #[error("Store error: {0}")]
    Store(String),

    /// Durable store operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Encoding or decoding a stored entry failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The owning context was cancelled while waiting.
    #[error("Operation cancelled")]
    Cancelled,

    /// Per-room agent could not be constructed or reached.
    #[error("Agent unavailable: {0}")]
    AgentUnavailable(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// Returns the client error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RcError::Store(_)
            | RcError::Database(_)
            | RcError::Serialization(_)
            | RcError::Config(_)
            | RcError::Internal(_)
            | RcError::LockNotHeld(_) => 6, // INTERNAL_ERROR
            RcError::RoomNotFound(_) | RcError::UserNotFound(_) => 4, // NOT_FOUND
            RcError::InconsistentState(_) => 5,                       // CONFLICT
            RcError::LockTimeout(_) => 8,                             // TIMEOUT
            RcError::MediaEngine(_) | RcError::AgentUnavailable(_) | RcError::Cancelled => 9, // UNAVAILABLE
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RcError::Store(_)
            | RcError::Database(_)
            | RcError::Serialization(_)
            | RcError::Config(_)
            | RcError::Internal(_)
            | RcError::LockNotHeld(_) => "An internal error occurred".to_string(),
            RcError::RoomNotFound(_) => "Room not found or not active".to_string(),
            RcError::UserNotFound(_) => "User not found".to_string(),
            RcError::InconsistentState(_) => {
                "Room state is being reconciled, please retry".to_string()
            }
            RcError::LockTimeout(_) => {
                "Room is busy with another operation, please retry".to_string()
            }
            RcError::MediaEngine(_) => "Media server unavailable".to_string(),
            RcError::AgentUnavailable(_) => "Requested service is unavailable".to_string(),
            RcError::Cancelled => "Server is shutting down, please retry".to_string(),
        }
    }

    /// Whether this is a not-found style error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, RcError::RoomNotFound(_) | RcError::UserNotFound(_))
    }
}

impl From<sqlx::Error> for RcError {
    fn from(err: sqlx::Error) -> Self {
        RcError::Database(err.to_string())
    }
}

impl From<redis::RedisError> for RcError {
    fn from(err: redis::RedisError) -> Self {
        RcError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for RcError {
    fn from(err: serde_json::Error) -> Self {
        RcError::Serialization(err.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(RcError::Store("conn refused".to_string()).error_code(), 6);
        assert_eq!(RcError::Database("pool closed".to_string()).error_code(), 6);
        assert_eq!(RcError::Internal("boom".to_string()).error_code(), 6);
        assert_eq!(RcError::LockNotHeld("k".to_string()).error_code(), 6);

        assert_eq!(RcError::RoomNotFound("room01".to_string()).error_code(), 4);
        assert_eq!(RcError::UserNotFound("u1".to_string()).error_code(), 4);

        assert_eq!(
            RcError::InconsistentState("drift".to_string()).error_code(),
            5
        );
        assert_eq!(RcError::LockTimeout("room01".to_string()).error_code(), 8);
        assert_eq!(RcError::MediaEngine("503".to_string()).error_code(), 9);
        assert_eq!(RcError::Cancelled.error_code(), 9);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let store_err = RcError::Store("connection refused at 10.0.0.5:6379".to_string());
        assert!(!store_err.client_message().contains("10.0.0.5"));
        assert_eq!(store_err.client_message(), "An internal error occurred");

        let db_err = RcError::Database("password authentication failed".to_string());
        assert!(!db_err.client_message().contains("password"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(RcError::RoomNotFound("r".to_string()).is_not_found());
        assert!(RcError::UserNotFound("u".to_string()).is_not_found());
        assert!(!RcError::LockTimeout("r".to_string()).is_not_found());
    }

    #[test]
    fn test_serde_error_conversion() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let rc_err: RcError = err.into();
        assert!(matches!(rc_err, RcError::Serialization(_)));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", RcError::LockTimeout("room01".to_string())),
            "Lock timeout: room01"
        );
        assert_eq!(format!("{}", RcError::Cancelled), "Operation cancelled");
    }
}
