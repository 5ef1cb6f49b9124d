//! Webhook and analytics emission.
//!
//! Emission is fire-and-forget: the sink never reports failure back to the
//! caller. Delivery, retry and backoff belong to the sink implementation.

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Room lifecycle notifications delivered to the room's webhook URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    RoomCreated,
    RoomFinished,
}

impl WebhookEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            WebhookEvent::RoomCreated => "room_created",
            WebhookEvent::RoomFinished => "room_finished",
        }
    }
}

/// Per-user analytics events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEvent {
    UserJoined,
    UserLeft,
}

impl AnalyticsEvent {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            AnalyticsEvent::UserJoined => "user_joined",
            AnalyticsEvent::UserLeft => "user_left",
        }
    }
}

/// Webhook notifier and analytics collaborator.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit_webhook(
        &self,
        event: WebhookEvent,
        room_id: &str,
        sid: &str,
        webhook_url: Option<&str>,
    );

    async fn record_analytics(&self, event: AnalyticsEvent, room_id: &str, user_id: &str);
}

/// Sink that records every event as a structured log line.
///
/// Used when no external notifier is wired in.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit_webhook(
        &self,
        event: WebhookEvent,
        room_id: &str,
        sid: &str,
        webhook_url: Option<&str>,
    ) {
        info!(
            target: "rc.events",
            event = event.as_str(),
            room_id = %room_id,
            sid = %sid,
            has_webhook = webhook_url.is_some(),
            "Room webhook event"
        );
    }

    async fn record_analytics(&self, event: AnalyticsEvent, room_id: &str, user_id: &str) {
        info!(
            target: "rc.events",
            event = event.as_str(),
            room_id = %room_id,
            user_id = %user_id,
            "Analytics event"
        );
    }
}
