//! Consent state machine
//!
//! The strategy is fixed at configuration time; the granted flag is persisted
//! in the store's scalar state. Revocation is destructive: the whole message
//! store (records, cursor, watermark, flag) is wiped.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::analytics::{AnalyticsSink, TrackEventType};
use crate::store::MessageStore;
use crate::types::error::EngageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsentStrategy {
    NotEnabled,
    AutoEnroll,
    ExplicitByUser,
}

/// Result of an enrollment (re-)check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentOutcome {
    /// Consent was just granted; sync should be enabled and triggered.
    Granted,
    /// Consent was just revoked; local state has been wiped.
    Revoked,
    /// No automatic transition applied.
    Unchanged,
}

pub struct ConsentManager {
    strategy: ConsentStrategy,
    store: Arc<MessageStore>,
    analytics: Arc<dyn AnalyticsSink>,
}

impl ConsentManager {
    pub fn new(
        strategy: ConsentStrategy,
        store: Arc<MessageStore>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            strategy,
            store,
            analytics,
        }
    }

    pub fn strategy(&self) -> ConsentStrategy {
        self.strategy
    }

    pub fn granted(&self) -> bool {
        self.store.consent_granted().unwrap_or(false)
    }

    /// Whether sync and display may run at all.
    pub fn enabled(&self) -> bool {
        self.strategy != ConsentStrategy::NotEnabled && self.granted()
    }

    /// Evaluate automatic transitions. Called on init and on user-identity
    /// change.
    pub fn check_enrollment(&self) -> Result<EnrollmentOutcome, EngageError> {
        match (self.strategy, self.granted()) {
            (ConsentStrategy::AutoEnroll, false) => {
                self.set_consent(true)?;
                Ok(EnrollmentOutcome::Granted)
            }
            (ConsentStrategy::NotEnabled, true) => {
                self.set_consent(false)?;
                Ok(EnrollmentOutcome::Revoked)
            }
            _ => Ok(EnrollmentOutcome::Unchanged),
        }
    }

    /// Explicit consent API. Only valid under the explicit-by-user strategy;
    /// calling it under any other strategy is a programmer error.
    pub fn update_consent(&self, granted: bool) -> Result<(), EngageError> {
        if self.strategy != ConsentStrategy::ExplicitByUser {
            panic!(
                "update_consent is only valid with ConsentStrategy::ExplicitByUser \
                 (configured strategy: {:?})",
                self.strategy
            );
        }

        self.set_consent(granted)
    }

    /// Apply a consent change. On grant the flag is persisted; on revocation
    /// the full messaging state is wiped (records, cursor, watermark, flag).
    pub(crate) fn set_consent(&self, granted: bool) -> Result<(), EngageError> {
        self.analytics.track(
            TrackEventType::InAppConsentChanged,
            json!({ "consented": granted }),
            true,
        );

        if granted {
            self.store.set_consent_granted(true)?;
            info!("In-app consent granted");
        } else {
            // delete_all clears the consent flag and cursor along with the
            // records; the wipe commits before anything else observes it.
            if let Err(e) = self.store.delete_all() {
                warn!("Failed to reset messaging state: {}", e);
                return Err(e);
            }
            info!("In-app consent revoked, messaging state reset");
        }

        Ok(())
    }

    /// Wipe messaging state without recording a consent-change event. Used on
    /// user-identity change, where the wipe is bookkeeping, not a decision.
    pub(crate) fn reset(&self) -> Result<(), EngageError> {
        self.store.delete_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::testing::RecordingAnalytics;
    use crate::types::message::parse_timestamp;

    fn setup(strategy: ConsentStrategy) -> (ConsentManager, Arc<MessageStore>, Arc<RecordingAnalytics>) {
        let store = Arc::new(MessageStore::in_memory().unwrap());
        let analytics = Arc::new(RecordingAnalytics::default());
        let manager = ConsentManager::new(strategy, store.clone(), analytics.clone());
        (manager, store, analytics)
    }

    #[test]
    fn auto_enroll_grants_on_first_check() {
        let (manager, _, analytics) = setup(ConsentStrategy::AutoEnroll);

        assert_eq!(
            manager.check_enrollment().unwrap(),
            EnrollmentOutcome::Granted
        );
        assert!(manager.enabled());
        assert_eq!(analytics.count_of(TrackEventType::InAppConsentChanged), 1);

        // Second check is a no-op
        assert_eq!(
            manager.check_enrollment().unwrap(),
            EnrollmentOutcome::Unchanged
        );
    }

    #[test]
    fn not_enabled_revokes_stale_grant() {
        let (manager, store, _) = setup(ConsentStrategy::NotEnabled);
        store.set_consent_granted(true).unwrap();
        store
            .set_cursor(parse_timestamp("2024-01-01T00:00:00Z").unwrap())
            .unwrap();

        assert_eq!(
            manager.check_enrollment().unwrap(),
            EnrollmentOutcome::Revoked
        );
        assert!(!manager.granted());
        assert!(store.cursor().unwrap().is_none());
    }

    #[test]
    fn explicit_strategy_never_auto_transitions() {
        let (manager, _, _) = setup(ConsentStrategy::ExplicitByUser);
        assert_eq!(
            manager.check_enrollment().unwrap(),
            EnrollmentOutcome::Unchanged
        );
        assert!(!manager.enabled());

        manager.update_consent(true).unwrap();
        assert!(manager.enabled());
    }

    #[test]
    fn revocation_is_destructive() {
        let (manager, store, _) = setup(ConsentStrategy::ExplicitByUser);
        manager.update_consent(true).unwrap();
        store
            .set_cursor(parse_timestamp("2024-01-01T00:00:00Z").unwrap())
            .unwrap();

        manager.update_consent(false).unwrap();

        assert!(!manager.granted());
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.cursor().unwrap().is_none());
    }

    #[test]
    #[should_panic(expected = "ExplicitByUser")]
    fn update_consent_panics_under_wrong_strategy() {
        let (manager, _, _) = setup(ConsentStrategy::AutoEnroll);
        let _ = manager.update_consent(true);
    }
}
