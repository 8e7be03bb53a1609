//! Inbox projection
//!
//! Read-only view over the store for the persistent message-list UI, plus the
//! read/delete mutations. Mutations that change inbox-visible state emit a
//! single `InboxUpdated` event per logical batch.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::analytics::{message_props, AnalyticsSink, TrackEventType};
use crate::notifications::{tickle_notification_id, NotificationCenter};
use crate::store::MessageStore;
use crate::types::error::EngageError;
use crate::types::message::Message;
use crate::types::EngageEvent;

/// One entry of the inbox list.
#[derive(Debug, Clone)]
pub struct InboxItem {
    pub id: i64,
    pub title: String,
    pub subtitle: String,
    pub image_path: Option<String>,
    pub available_from: Option<DateTime<Utc>>,
    pub available_to: Option<DateTime<Utc>>,
    pub sent_at: DateTime<Utc>,
    pub data: Option<Value>,
    read: bool,
}

impl InboxItem {
    pub fn is_read(&self) -> bool {
        self.read
    }

    fn from_message(message: &Message) -> Option<Self> {
        let inbox = message.inbox_config.as_ref()?;

        let title = inbox.get("title").and_then(Value::as_str);
        let subtitle = inbox.get("subtitle").and_then(Value::as_str);
        let (title, subtitle) = match (title, subtitle) {
            (Some(t), Some(s)) => (t.to_string(), s.to_string()),
            _ => {
                warn!("Inbox config for message {} lacks title/subtitle, skipping", message.id);
                return None;
            }
        };

        Some(Self {
            id: message.id,
            title,
            subtitle,
            image_path: inbox
                .get("imagePath")
                .and_then(Value::as_str)
                .map(String::from),
            available_from: message.inbox_from,
            available_to: message.inbox_to,
            sent_at: message.recency(),
            data: message.data.clone(),
            read: message.read_at.is_some(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboxSummary {
    pub total_count: u32,
    pub unread_count: u32,
}

pub struct InboxView {
    store: Arc<MessageStore>,
    analytics: Arc<dyn AnalyticsSink>,
    notifications: Arc<dyn NotificationCenter>,
    events: flume::Sender<EngageEvent>,
}

impl InboxView {
    pub fn new(
        store: Arc<MessageStore>,
        analytics: Arc<dyn AnalyticsSink>,
        notifications: Arc<dyn NotificationCenter>,
        events: flume::Sender<EngageEvent>,
    ) -> Self {
        Self {
            store,
            analytics,
            notifications,
            events,
        }
    }

    fn notify_inbox_updated(&self) {
        let _ = self.events.send(EngageEvent::InboxUpdated);
    }

    /// Inbox items currently inside their availability window, most recent
    /// first.
    pub fn items(&self) -> Result<Vec<InboxItem>, EngageError> {
        let now = Utc::now();
        let items = self
            .store
            .inbox_messages()?
            .iter()
            .filter(|m| m.is_available(now))
            .filter_map(InboxItem::from_message)
            .collect();
        Ok(items)
    }

    /// Total and unread counts over available items.
    pub fn summary(&self) -> Result<InboxSummary, EngageError> {
        let now = Utc::now();
        let mut summary = InboxSummary {
            total_count: 0,
            unread_count: 0,
        };

        for message in self.store.inbox_messages()? {
            if !message.is_available(now) {
                continue;
            }
            summary.total_count += 1;
            if message.read_at.is_none() {
                summary.unread_count += 1;
            }
        }

        Ok(summary)
    }

    /// Mark a single item read. Returns false when the item was missing or
    /// already read.
    pub fn mark_read(&self, id: i64) -> bool {
        let changed = self.mark_read_quiet(id);
        if changed {
            self.notify_inbox_updated();
        }
        changed
    }

    /// Mark-read without the inbox-updated signal; used by batch operations
    /// and the message-opened path, which coalesce the signal themselves.
    pub(crate) fn mark_read_quiet(&self, id: i64) -> bool {
        let changed = match self.store.mark_read(id, Utc::now()) {
            Ok(changed) => changed,
            Err(e) => {
                warn!("Failed to mark message {} read: {}", id, e);
                return false;
            }
        };

        if changed {
            self.analytics
                .track(TrackEventType::MessageRead, message_props(id), false);
            self.notifications
                .remove_delivered(&tickle_notification_id(id));
        }

        changed
    }

    /// Mark every unread available item read. Emits at most one
    /// inbox-updated signal for the whole batch. Returns false when any
    /// single mark failed.
    pub fn mark_all_read(&self) -> bool {
        let items = match self.items() {
            Ok(items) => items,
            Err(e) => {
                warn!("Failed to read inbox for mark-all-read: {}", e);
                return false;
            }
        };

        let mut all_ok = true;
        let mut any_changed = false;
        for item in items.iter().filter(|i| !i.is_read()) {
            if self.mark_read_quiet(item.id) {
                any_changed = true;
            } else {
                all_ok = false;
            }
        }

        if any_changed {
            self.notify_inbox_updated();
        }

        all_ok
    }

    /// Remove an item from the inbox. The underlying record is dismissed and
    /// becomes an eviction candidate on the next sync pass.
    pub fn delete(&self, id: i64) -> bool {
        self.analytics.track(
            TrackEventType::MessageDeletedFromInbox,
            message_props(id),
            false,
        );
        self.notifications
            .remove_delivered(&tickle_notification_id(id));

        let changed = match self.store.remove_from_inbox(id, Utc::now()) {
            Ok(changed) => changed,
            Err(e) => {
                warn!("Failed to delete inbox message {}: {}", id, e);
                return false;
            }
        };

        if changed {
            self.notify_inbox_updated();
        }
        changed
    }
}
