//! Analytics sink contract
//!
//! Event transport is out of scope; the engine only needs somewhere to hand
//! tracking events. Event type strings match the server-side taxonomy.

use serde_json::{json, Value};

/// Message type discriminator carried in tracking event properties.
pub const MESSAGE_TYPE_IN_APP: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEventType {
    MessageDelivered,
    MessageOpened,
    MessageDismissed,
    MessageRead,
    MessageDeletedFromInbox,
    InAppConsentChanged,
}

impl TrackEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageDelivered => "k.message.delivered",
            Self::MessageOpened => "k.message.opened",
            Self::MessageDismissed => "k.message.dismissed",
            Self::MessageRead => "k.message.read",
            Self::MessageDeletedFromInbox => "k.message.inbox.deleted",
            Self::InAppConsentChanged => "k.inApp.statusUpdated",
        }
    }
}

/// Host-provided event sink. Fire-and-forget from the engine's perspective.
pub trait AnalyticsSink: Send + Sync {
    fn track(&self, event: TrackEventType, properties: Value, immediate_flush: bool);
}

/// Standard properties for per-message tracking events.
pub fn message_props(message_id: i64) -> Value {
    json!({ "type": MESSAGE_TYPE_IN_APP, "id": message_id })
}

/// Sink that drops everything. Useful for hosts that do not track.
pub struct NoopAnalytics;

impl AnalyticsSink for NoopAnalytics {
    fn track(&self, _event: TrackEventType, _properties: Value, _immediate_flush: bool) {}
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records tracked events for assertions.
    #[derive(Default)]
    pub struct RecordingAnalytics {
        pub events: Mutex<Vec<(TrackEventType, Value, bool)>>,
    }

    impl AnalyticsSink for RecordingAnalytics {
        fn track(&self, event: TrackEventType, properties: Value, immediate_flush: bool) {
            self.events
                .lock()
                .unwrap()
                .push((event, properties, immediate_flush));
        }
    }

    impl RecordingAnalytics {
        pub fn count_of(&self, event: TrackEventType) -> usize {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(e, _, _)| *e == event)
                .count()
        }
    }
}
