//! Incremental message sync
//!
//! Pulls message updates from the remote endpoint and applies them to the
//! store: upsert, eviction, cursor advance, delivery tracking, and ambient
//! hand-off to the presentation queue when the app is foregrounded.
//!
//! All runs are serialized through one async mutex so overlapping triggers
//! (app-active, push-arrival, debounce timer) coalesce into sequential
//! executions; a debounced caller re-checks the watermark after any in-flight
//! run finishes.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::analytics::{message_props, AnalyticsSink, TrackEventType};
use crate::config::EngageConfig;
use crate::present::Presenter;
use crate::store::MessageStore;
use crate::transport::{url_encode, HttpMethod, Transport};
use crate::types::message::{PresentRule, ServerMessage};
use crate::types::EngageEvent;

/// Result of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Server returned no records.
    NoChanges,
    /// Records were fetched and applied.
    Fetched(u32),
    /// Transport or decode failure; cursor untouched, retried on the next
    /// lifecycle trigger.
    Failed,
    /// Debounced: a successful sync happened recently enough.
    Skipped,
}

impl SyncOutcome {
    pub fn fetched_count(&self) -> u32 {
        match self {
            Self::Fetched(n) => *n,
            _ => 0,
        }
    }
}

pub struct SyncEngine {
    config: EngageConfig,
    store: Arc<MessageStore>,
    transport: Arc<dyn Transport>,
    analytics: Arc<dyn AnalyticsSink>,
    presenter: Arc<Presenter>,
    events: flume::Sender<EngageEvent>,
    foreground: Arc<AtomicBool>,
    run_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        config: EngageConfig,
        store: Arc<MessageStore>,
        transport: Arc<dyn Transport>,
        analytics: Arc<dyn AnalyticsSink>,
        presenter: Arc<Presenter>,
        events: flume::Sender<EngageEvent>,
        foreground: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            store,
            transport,
            analytics,
            presenter,
            events,
            foreground,
            run_lock: Mutex::new(()),
        }
    }

    /// Fetch and apply message updates. Concurrent callers queue behind the
    /// in-flight run.
    pub async fn sync(&self, user_identifier: &str) -> SyncOutcome {
        let _guard = self.run_lock.lock().await;
        self.do_sync(user_identifier).await
    }

    /// Like [`Self::sync`] but a no-op inside the debounce window. The check
    /// runs under the serialization lock, so a caller that waited out an
    /// in-flight sync re-evaluates against the fresh watermark.
    pub async fn sync_debounced(&self, user_identifier: &str) -> SyncOutcome {
        let _guard = self.run_lock.lock().await;

        if self.within_debounce_window(Utc::now()) {
            debug!("Sync debounced, last run within window");
            return SyncOutcome::Skipped;
        }

        self.do_sync(user_identifier).await
    }

    fn within_debounce_window(&self, now: DateTime<Utc>) -> bool {
        match self.store.last_synced_at() {
            Ok(Some(last)) => now - last < Duration::seconds(self.config.sync_debounce_seconds),
            _ => false,
        }
    }

    fn messages_path(&self, user_identifier: &str) -> String {
        let mut path = format!("/v1/users/{}/messages", url_encode(user_identifier));

        if let Ok(Some(cursor)) = self.store.cursor() {
            let after = cursor.to_rfc3339_opts(SecondsFormat::Secs, true);
            path.push_str("?after=");
            path.push_str(&url_encode(&after));
        }

        path
    }

    async fn do_sync(&self, user_identifier: &str) -> SyncOutcome {
        let path = self.messages_path(user_identifier);
        debug!("Syncing messages from {}", path);

        let (status, body) = match self
            .transport
            .send_request(HttpMethod::Get, &path, None)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Sync request failed: {}", e);
                return SyncOutcome::Failed;
            }
        };

        if status >= 400 {
            warn!("Sync request returned status {}", status);
            return SyncOutcome::Failed;
        }

        let records: Vec<ServerMessage> = match body {
            None => Vec::new(),
            Some(value) => match serde_json::from_value(value) {
                Ok(records) => records,
                Err(e) => {
                    error!("Failed to decode sync response: {}", e);
                    return SyncOutcome::Failed;
                }
            },
        };

        let now = Utc::now();

        if records.is_empty() {
            // Advance only the debounce watermark. The cursor moves to the
            // max updatedAt actually observed, never to "now", so records
            // created concurrently with this window are not skipped.
            if let Err(e) = self.store.set_last_synced_at(now) {
                warn!("Failed to persist sync watermark: {}", e);
            }
            let _ = self.events.send(EngageEvent::SyncCompleted { fetched: 0 });
            return SyncOutcome::NoChanges;
        }

        let mut processed = 0u32;
        let mut max_updated: Option<DateTime<Utc>> = None;
        let mut fetched_inbox = false;

        for record in &records {
            let incoming = match record.validate() {
                Ok(incoming) => incoming,
                Err(e) => {
                    // A single bad payload must not fail the batch.
                    warn!("Skipping malformed record: {}", e);
                    continue;
                }
            };

            if let Err(e) = self.store.upsert(&incoming) {
                warn!("Failed to persist message {}: {}", incoming.id, e);
                continue;
            }

            fetched_inbox |= incoming.inbox_config.is_some() || incoming.inbox_deleted_at.is_some();
            max_updated = Some(match max_updated {
                Some(max) => max.max(incoming.updated_at),
                None => incoming.updated_at,
            });

            self.analytics.track(
                TrackEventType::MessageDelivered,
                message_props(incoming.id),
                false,
            );
            processed += 1;
        }

        let mut inbox_changed = fetched_inbox;
        match self.store.evict_expired_or_dismissed(now) {
            Ok(result) => inbox_changed |= result.evicted_inbox,
            Err(e) => warn!("Eviction pass failed: {}", e),
        }
        match self
            .store
            .evict_over_capacity(self.config.stored_message_limit)
        {
            Ok(result) => inbox_changed |= result.evicted_inbox,
            Err(e) => warn!("Capacity eviction failed: {}", e),
        }

        // Cursor and watermark are written only after the batch applied.
        if let Some(max_updated) = max_updated {
            let previous = self.store.cursor().unwrap_or(None);
            let cursor = previous.map_or(max_updated, |c| c.max(max_updated));
            if let Err(e) = self.store.set_cursor(cursor) {
                warn!("Failed to persist sync cursor: {}", e);
            }
        }
        if let Err(e) = self.store.set_last_synced_at(now) {
            warn!("Failed to persist sync watermark: {}", e);
        }

        if inbox_changed {
            let _ = self.events.send(EngageEvent::InboxUpdated);
        }
        let _ = self.events.send(EngageEvent::SyncCompleted { fetched: processed });

        info!("Sync applied {} of {} record(s)", processed, records.len());

        if self.foreground.load(Ordering::SeqCst) {
            self.present_ambient(&[PresentRule::Immediately]);
        }

        SyncOutcome::Fetched(processed)
    }

    /// Compute ambient-eligible messages and hand them to the presentation
    /// queue.
    pub fn present_ambient(&self, rules: &[PresentRule]) {
        let tickle_ids = self.presenter.pending_tickle_ids();
        match self.store.messages_to_present(rules, &tickle_ids, Utc::now()) {
            Ok(messages) if !messages.is_empty() => {
                self.presenter.queue_for_presentation(messages, &[]);
            }
            Ok(_) => {}
            Err(e) => warn!("Failed to compute eligible messages: {}", e),
        }
    }
}
