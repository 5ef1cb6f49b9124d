//! Event sink that records every emission.

use async_trait::async_trait;
use room_controller::services::{AnalyticsEvent, EventSink, WebhookEvent};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Webhook {
        event: WebhookEvent,
        room_id: String,
        sid: String,
    },
    Analytics {
        event: AnalyticsEvent,
        room_id: String,
        user_id: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Webhook events emitted for one room, in order.
    #[must_use]
    pub fn webhooks(&self, room_id: &str) -> Vec<WebhookEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::Webhook { event, room_id: r, .. } if r == room_id => Some(event),
                _ => None,
            })
            .collect()
    }

    /// Analytics events recorded for one user, in order.
    #[must_use]
    pub fn analytics(&self, room_id: &str, user_id: &str) -> Vec<AnalyticsEvent> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                RecordedEvent::Analytics {
                    event,
                    room_id: r,
                    user_id: u,
                } if r == room_id && u == user_id => Some(event),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for RecordingEventSink {
    async fn emit_webhook(
        &self,
        event: WebhookEvent,
        room_id: &str,
        sid: &str,
        _webhook_url: Option<&str>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent::Webhook {
            event,
            room_id: room_id.to_string(),
            sid: sid.to_string(),
        });
    }

    async fn record_analytics(&self, event: AnalyticsEvent, room_id: &str, user_id: &str) {
        self.events.lock().unwrap().push(RecordedEvent::Analytics {
            event,
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        });
    }
}
