//! Engine facade
//!
//! `InAppManager` wires the store, sync engine, consent machine, presenter,
//! and inbox view together and exposes the lifecycle entry points the host
//! application calls: initialization, app foreground/background transitions,
//! push opens, and renderer callbacks. All collaborators are injected, so a
//! host supplies its own transport, renderer, analytics, and notification
//! center (or the provided defaults).

use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

use crate::analytics::{message_props, AnalyticsSink, TrackEventType};
use crate::config::EngageConfig;
use crate::consent::{ConsentManager, ConsentStrategy, EnrollmentOutcome};
use crate::inbox::{InboxItem, InboxSummary, InboxView};
use crate::notifications::{tickle_notification_id, NotificationCenter};
use crate::present::{DisplayMode, Presenter, Renderer};
use crate::store::MessageStore;
use crate::sync::SyncEngine;
use crate::transport::{HttpTransport, Transport};
use crate::types::error::EngageError;
use crate::types::message::PresentRule;
use crate::types::EngageEvent;

pub struct InAppManager {
    store: Arc<MessageStore>,
    engine: SyncEngine,
    presenter: Arc<Presenter>,
    consent: ConsentManager,
    inbox: InboxView,
    analytics: Arc<dyn AnalyticsSink>,
    notifications: Arc<dyn NotificationCenter>,
    foreground: Arc<AtomicBool>,
    user_identifier: RwLock<String>,
    events_tx: flume::Sender<EngageEvent>,
    events_rx: flume::Receiver<EngageEvent>,
}

impl InAppManager {
    pub fn new(
        config: EngageConfig,
        transport: Arc<dyn Transport>,
        renderer: Arc<dyn Renderer>,
        analytics: Arc<dyn AnalyticsSink>,
        notifications: Arc<dyn NotificationCenter>,
    ) -> Result<Self, EngageError> {
        let store = Arc::new(match &config.db_path {
            Some(path) => MessageStore::new(path)?,
            None => MessageStore::in_memory()?,
        });

        let (events_tx, events_rx) = flume::unbounded();
        let presenter = Arc::new(Presenter::new(renderer, config.default_display_mode));
        let foreground = Arc::new(AtomicBool::new(false));

        let consent = ConsentManager::new(config.consent_strategy, store.clone(), analytics.clone());
        let inbox = InboxView::new(
            store.clone(),
            analytics.clone(),
            notifications.clone(),
            events_tx.clone(),
        );

        let user_identifier = RwLock::new(config.user_identifier.clone());
        let engine = SyncEngine::new(
            config,
            store.clone(),
            transport,
            analytics.clone(),
            presenter.clone(),
            events_tx.clone(),
            foreground.clone(),
        );

        Ok(Self {
            store,
            engine,
            presenter,
            consent,
            inbox,
            analytics,
            notifications,
            foreground,
            user_identifier,
            events_tx,
            events_rx,
        })
    }

    /// Build a manager with the default reqwest-backed transport.
    pub fn with_http_transport(
        config: EngageConfig,
        renderer: Arc<dyn Renderer>,
        analytics: Arc<dyn AnalyticsSink>,
        notifications: Arc<dyn NotificationCenter>,
    ) -> Result<Self, EngageError> {
        let transport = Arc::new(HttpTransport::new(
            &config.base_url,
            config.request_timeout_seconds,
        )?);
        Self::new(config, transport, renderer, analytics, notifications)
    }

    /// Receiver for inbox-updated and sync-completed events. Every subscriber
    /// gets its own clone of the channel.
    pub fn subscribe(&self) -> flume::Receiver<EngageEvent> {
        self.events_rx.clone()
    }

    pub fn in_app_enabled(&self) -> bool {
        self.consent.enabled()
    }

    pub fn current_user(&self) -> String {
        self.user_identifier.read().unwrap().clone()
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.presenter.display_mode()
    }

    pub fn set_display_mode(&self, mode: DisplayMode) {
        self.presenter.set_display_mode(mode);
    }

    /// Evaluate enrollment and, when messaging is enabled, run an initial
    /// sync. Call once at application start.
    pub async fn initialize(&self) -> Result<(), EngageError> {
        match self.consent.check_enrollment()? {
            EnrollmentOutcome::Granted => self.sync_and_present().await,
            EnrollmentOutcome::Revoked => {}
            EnrollmentOutcome::Unchanged => {
                if self.consent.enabled() {
                    self.sync_and_present().await;
                }
            }
        }
        Ok(())
    }

    /// Explicit consent API; only valid under
    /// [`ConsentStrategy::ExplicitByUser`]. Granting triggers a sync;
    /// revoking wipes local state and drops any pending presentation.
    pub async fn update_consent(&self, granted: bool) -> Result<(), EngageError> {
        self.consent.update_consent(granted)?;

        if granted {
            self.sync_and_present().await;
        } else {
            self.presenter.cancel(false);
        }
        Ok(())
    }

    /// Switch the active user. Local messaging state belongs to the previous
    /// user and is wiped before enrollment is re-evaluated for the new one.
    pub async fn handle_user_change(
        &self,
        new_user_identifier: &str,
    ) -> Result<(), EngageError> {
        if self.consent.strategy() == ConsentStrategy::NotEnabled {
            *self.user_identifier.write().unwrap() = new_user_identifier.to_string();
            return Ok(());
        }

        self.presenter.cancel(false);
        self.consent.reset()?;
        *self.user_identifier.write().unwrap() = new_user_identifier.to_string();

        if self.consent.check_enrollment()? == EnrollmentOutcome::Granted {
            self.sync_and_present().await;
        }
        Ok(())
    }

    /// App came to the foreground: surface pending next-open content, then
    /// run a debounced sync.
    pub async fn handle_app_became_active(&self) {
        self.foreground.store(true, Ordering::SeqCst);
        if !self.consent.enabled() {
            return;
        }

        self.engine
            .present_ambient(&[PresentRule::Immediately, PresentRule::NextOpen]);

        let user = self.current_user();
        let outcome = self.engine.sync_debounced(&user).await;
        if outcome.fetched_count() > 0 {
            self.engine
                .present_ambient(&[PresentRule::Immediately, PresentRule::NextOpen]);
        }
    }

    pub fn handle_app_entered_background(&self) {
        self.foreground.store(false, Ordering::SeqCst);
    }

    /// The user opened a push tied to a message. If the message is already in
    /// the store it is presented as a tickle; otherwise a sync fetches it
    /// first.
    pub async fn handle_push_open(&self, message_id: i64) {
        if !self.consent.enabled() {
            debug!("Ignoring push open for {}: messaging disabled", message_id);
            return;
        }

        self.presenter.register_tickle(message_id);

        if self.try_present_tickles(message_id) {
            return;
        }

        let user = self.current_user();
        self.engine.sync(&user).await;
        self.try_present_tickles(message_id);
    }

    /// Queue the tickle-eligible messages when the awaited one is among them.
    fn try_present_tickles(&self, message_id: i64) -> bool {
        let tickle_ids = self.presenter.pending_tickle_ids();
        match self.store.messages_to_present(&[], &tickle_ids, Utc::now()) {
            Ok(messages) if messages.iter().any(|m| m.id == message_id) => {
                self.presenter.queue_for_presentation(messages, &[]);
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Failed to load tickle messages: {}", e);
                false
            }
        }
    }

    /// Present a specific stored message, jumping it ahead of ambient
    /// content. Returns false when the message is missing or no longer
    /// available.
    pub fn present_message(&self, message_id: i64) -> bool {
        match self.store.get(message_id) {
            Ok(Some(message)) if message.is_available(Utc::now()) => {
                self.presenter
                    .queue_for_presentation(vec![message], &[message_id]);
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("Failed to load message {}: {}", message_id, e);
                false
            }
        }
    }

    /// Renderer callback: the current message became visible to the user.
    pub fn handle_message_opened(&self, message_id: i64) {
        let has_inbox = matches!(
            self.store.get(message_id),
            Ok(Some(ref m)) if m.inbox_config.is_some()
        );

        let marked_read = self.inbox.mark_read_quiet(message_id);
        if has_inbox && marked_read {
            let _ = self.events_tx.send(EngageEvent::InboxUpdated);
        }

        self.analytics.track(
            TrackEventType::MessageOpened,
            message_props(message_id),
            false,
        );
    }

    /// Renderer callback: the current message was closed. Advances the
    /// presentation queue and clears the closed message's push tickle.
    pub fn handle_message_closed(&self) {
        if let Some(closed_id) = self.presenter.on_message_closed() {
            self.notifications
                .remove_delivered(&tickle_notification_id(closed_id));
        }
    }

    /// Renderer callback: the user dismissed the message (as opposed to it
    /// simply closing). The record becomes an eviction candidate.
    pub fn handle_message_dismissed(&self, message_id: i64) {
        self.analytics.track(
            TrackEventType::MessageDismissed,
            message_props(message_id),
            false,
        );

        if let Err(e) = self.store.mark_dismissed(message_id, Utc::now()) {
            warn!("Failed to mark message {} dismissed: {}", message_id, e);
        }
    }

    /// Abort presentation and drop queued content, e.g. on renderer failure.
    pub fn cancel_presentation(&self, wait_for_cleanup: bool) {
        self.presenter.cancel(wait_for_cleanup);
    }

    pub fn inbox_items(&self) -> Result<Vec<InboxItem>, EngageError> {
        self.inbox.items()
    }

    pub fn inbox_summary(&self) -> Result<InboxSummary, EngageError> {
        self.inbox.summary()
    }

    pub fn mark_inbox_item_read(&self, message_id: i64) -> bool {
        self.inbox.mark_read(message_id)
    }

    pub fn mark_all_inbox_items_read(&self) -> bool {
        self.inbox.mark_all_read()
    }

    pub fn delete_inbox_item(&self, message_id: i64) -> bool {
        self.inbox.delete(message_id)
    }

    async fn sync_and_present(&self) {
        let user = self.current_user();
        let outcome = self.engine.sync(&user).await;
        if outcome.fetched_count() > 0 {
            self.engine
                .present_ambient(&[PresentRule::Immediately, PresentRule::NextOpen]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testing::RecordingAnalytics;
    use crate::present::testing::RecordingRenderer;
    use crate::transport::testing::ScriptedTransport;
    use crate::types::message::{parse_timestamp, IncomingMessage};
    use serde_json::{json, Value};
    use std::sync::Mutex;

    struct RecordingNotificationCenter {
        removed: Mutex<Vec<String>>,
    }

    impl RecordingNotificationCenter {
        fn new() -> Self {
            Self {
                removed: Mutex::new(Vec::new()),
            }
        }

        fn removed(&self) -> Vec<String> {
            self.removed.lock().unwrap().clone()
        }
    }

    impl NotificationCenter for RecordingNotificationCenter {
        fn remove_delivered(&self, identifier: &str) {
            self.removed.lock().unwrap().push(identifier.to_string());
        }
    }

    struct Harness {
        manager: InAppManager,
        transport: Arc<ScriptedTransport>,
        analytics: Arc<RecordingAnalytics>,
        renderer: Arc<RecordingRenderer>,
        notifications: Arc<RecordingNotificationCenter>,
    }

    fn harness(
        strategy: ConsentStrategy,
        responses: Vec<Result<(u16, Option<Value>), EngageError>>,
    ) -> Harness {
        let mut config =
            EngageConfig::new("https://push.example.com", "u1", strategy);
        config.db_path = None;

        let transport = Arc::new(ScriptedTransport::new(responses));
        let analytics = Arc::new(RecordingAnalytics::default());
        let renderer = Arc::new(RecordingRenderer::default());
        let notifications = Arc::new(RecordingNotificationCenter::new());

        let manager = InAppManager::new(
            config,
            transport.clone(),
            renderer.clone(),
            analytics.clone(),
            notifications.clone(),
        )
        .unwrap();

        Harness {
            manager,
            transport,
            analytics,
            renderer,
            notifications,
        }
    }

    fn record(id: i64, presented_when: &str) -> Value {
        json!({
            "id": id,
            "updatedAt": "2024-01-01T00:00:00Z",
            "presentedWhen": presented_when,
            "content": {"layout": "full"},
        })
    }

    fn incoming(id: i64, rule: PresentRule) -> IncomingMessage {
        IncomingMessage {
            id,
            updated_at: parse_timestamp("2024-01-01T00:00:00Z").unwrap(),
            present_rule: rule,
            content: json!({}),
            data: None,
            badge_config: None,
            inbox_config: None,
            inbox_from: None,
            inbox_to: None,
            inbox_deleted_at: None,
            dismissed_at: None,
            read_at: None,
            sent_at: None,
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn initialize_auto_enrolls_and_syncs() {
        let h = harness(
            ConsentStrategy::AutoEnroll,
            vec![Ok((200, Some(json!([record(1, "immediately")]))))],
        );

        h.manager.initialize().await.unwrap();

        assert!(h.manager.in_app_enabled());
        assert_eq!(h.transport.request_count(), 1);
        assert!(h.manager.store.get(1).unwrap().is_some());
        // Fetched content presents right away
        assert_eq!(h.renderer.calls(), vec!["prepare", "show:1"]);
    }

    #[tokio::test]
    async fn initialize_without_enrollment_never_syncs() {
        let h = harness(ConsentStrategy::NotEnabled, vec![]);

        h.manager.initialize().await.unwrap();

        assert!(!h.manager.in_app_enabled());
        assert_eq!(h.transport.request_count(), 0);
    }

    #[tokio::test]
    async fn explicit_strategy_syncs_only_after_consent() {
        let h = harness(
            ConsentStrategy::ExplicitByUser,
            vec![Ok((200, Some(json!([record(1, "immediately")]))))],
        );

        h.manager.initialize().await.unwrap();
        assert_eq!(h.transport.request_count(), 0);

        h.manager.update_consent(true).await.unwrap();
        assert!(h.manager.in_app_enabled());
        assert_eq!(h.transport.request_count(), 1);
    }

    #[tokio::test]
    async fn consent_revocation_wipes_and_cancels() {
        let h = harness(
            ConsentStrategy::ExplicitByUser,
            vec![Ok((200, Some(json!([record(1, "immediately")]))))],
        );
        h.manager.update_consent(true).await.unwrap();
        assert_eq!(h.manager.store.count().unwrap(), 1);

        h.manager.update_consent(false).await.unwrap();

        assert!(!h.manager.in_app_enabled());
        assert_eq!(h.manager.store.count().unwrap(), 0);
        assert!(h.manager.presenter.current_message_id().is_none());
    }

    #[tokio::test]
    async fn app_active_presents_next_open_content() {
        let h = harness(ConsentStrategy::AutoEnroll, vec![Ok((200, Some(json!([]))))]);
        h.manager.consent.check_enrollment().unwrap();
        h.manager
            .store
            .upsert(&incoming(1, PresentRule::NextOpen))
            .unwrap();

        h.manager.handle_app_became_active().await;

        assert_eq!(h.renderer.calls(), vec!["prepare", "show:1"]);
    }

    #[tokio::test]
    async fn app_active_is_gated_on_consent() {
        let h = harness(ConsentStrategy::ExplicitByUser, vec![]);

        h.manager.handle_app_became_active().await;

        assert_eq!(h.transport.request_count(), 0);
        assert!(h.renderer.calls().is_empty());
    }

    #[tokio::test]
    async fn push_open_presents_stored_message_without_network() {
        let h = harness(ConsentStrategy::AutoEnroll, vec![]);
        h.manager.consent.check_enrollment().unwrap();
        h.manager
            .store
            .upsert(&incoming(1, PresentRule::Never))
            .unwrap();

        h.manager.handle_push_open(1).await;

        assert_eq!(h.transport.request_count(), 0);
        assert_eq!(h.renderer.calls(), vec!["prepare", "show:1"]);
    }

    #[tokio::test]
    async fn push_open_syncs_when_message_missing() {
        let h = harness(
            ConsentStrategy::AutoEnroll,
            vec![Ok((200, Some(json!([record(7, "never")]))))],
        );
        h.manager.consent.check_enrollment().unwrap();

        h.manager.handle_push_open(7).await;

        assert_eq!(h.transport.request_count(), 1);
        assert_eq!(h.renderer.calls(), vec!["prepare", "show:7"]);
    }

    #[tokio::test]
    async fn message_opened_marks_read_and_signals_inbox() {
        let h = harness(ConsentStrategy::AutoEnroll, vec![]);
        let mut msg = incoming(1, PresentRule::Never);
        msg.inbox_config = Some(json!({"title": "t", "subtitle": "s"}));
        h.manager.store.upsert(&msg).unwrap();
        let events = h.manager.subscribe();

        h.manager.handle_message_opened(1);

        assert!(h.manager.store.get(1).unwrap().unwrap().read_at.is_some());
        assert_eq!(h.analytics.count_of(TrackEventType::MessageOpened), 1);
        assert_eq!(h.analytics.count_of(TrackEventType::MessageRead), 1);
        assert_eq!(
            events.drain().collect::<Vec<_>>(),
            vec![EngageEvent::InboxUpdated]
        );

        // Re-opening the same message does not signal again
        h.manager.handle_message_opened(1);
        assert_eq!(events.drain().count(), 0);
        assert_eq!(h.analytics.count_of(TrackEventType::MessageOpened), 2);
    }

    #[tokio::test]
    async fn message_closed_clears_tickle_notification() {
        let h = harness(ConsentStrategy::AutoEnroll, vec![]);
        h.manager.consent.check_enrollment().unwrap();
        h.manager
            .store
            .upsert(&incoming(4, PresentRule::Never))
            .unwrap();
        assert!(h.manager.present_message(4));

        h.manager.handle_message_closed();

        assert_eq!(h.notifications.removed(), vec!["k-in-app-message:4"]);
        assert!(h.manager.presenter.current_message_id().is_none());
    }

    #[tokio::test]
    async fn dismissal_tracks_and_persists() {
        let h = harness(ConsentStrategy::AutoEnroll, vec![]);
        h.manager.store.upsert(&incoming(1, PresentRule::Never)).unwrap();

        h.manager.handle_message_dismissed(1);

        assert_eq!(h.analytics.count_of(TrackEventType::MessageDismissed), 1);
        assert!(h
            .manager
            .store
            .get(1)
            .unwrap()
            .unwrap()
            .dismissed_at
            .is_some());
    }

    #[tokio::test]
    async fn present_message_rejects_missing_id() {
        let h = harness(ConsentStrategy::AutoEnroll, vec![]);
        assert!(!h.manager.present_message(99));
        assert!(h.renderer.calls().is_empty());
    }

    #[tokio::test]
    async fn user_change_wipes_state_and_reenrolls() {
        let h = harness(
            ConsentStrategy::AutoEnroll,
            vec![
                Ok((200, Some(json!([record(1, "never")])))),
                Ok((200, Some(json!([])))),
            ],
        );
        h.manager.initialize().await.unwrap();
        assert_eq!(h.manager.store.count().unwrap(), 1);

        h.manager.handle_user_change("u2").await.unwrap();

        assert_eq!(h.manager.current_user(), "u2");
        assert_eq!(h.manager.store.count().unwrap(), 0);
        // Fresh enrollment synced the new user without the old cursor
        let requests = h.transport.requests();
        assert_eq!(requests[1], "/v1/users/u2/messages");
        assert!(h.manager.in_app_enabled());
    }
}
