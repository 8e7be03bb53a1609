//! Platform notification center contract
//!
//! Used only to clear a delivered push "tickle" once its message has been
//! consumed (read, closed, or deleted from the inbox).

/// Host-provided hook into the platform notification center.
pub trait NotificationCenter: Send + Sync {
    /// Remove a delivered notification by identifier.
    fn remove_delivered(&self, identifier: &str);
}

/// Identifier format shared with the push pipeline.
pub fn tickle_notification_id(message_id: i64) -> String {
    format!("k-in-app-message:{message_id}")
}

/// No-op implementation for hosts without a notification center.
pub struct NoopNotificationCenter;

impl NotificationCenter for NoopNotificationCenter {
    fn remove_delivered(&self, _identifier: &str) {}
}
