//! SDK configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::consent::ConsentStrategy;
use crate::present::DisplayMode;

/// Configuration for the in-app message engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngageConfig {
    /// Base URL of the messages endpoint.
    pub base_url: String,
    /// Identifier of the end user currently associated with this install.
    pub user_identifier: String,
    /// Database file path. `None` uses an in-memory store (testing).
    pub db_path: Option<PathBuf>,
    /// Consent strategy, fixed for the lifetime of the engine.
    pub consent_strategy: ConsentStrategy,
    /// Initial display mode for the presentation layer.
    pub default_display_mode: DisplayMode,
    /// Maximum number of stored message records before capacity eviction.
    pub stored_message_limit: usize,
    /// Debounce window for `sync_debounced`, in seconds.
    pub sync_debounce_seconds: i64,
    /// Request timeout for sync calls, in seconds.
    pub request_timeout_seconds: u64,
}

impl EngageConfig {
    pub fn new(
        base_url: impl Into<String>,
        user_identifier: impl Into<String>,
        consent_strategy: ConsentStrategy,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            user_identifier: user_identifier.into(),
            db_path: Some(Self::default_db_path()),
            consent_strategy,
            default_display_mode: DisplayMode::Automatic,
            stored_message_limit: 50,
            sync_debounce_seconds: 3600,
            request_timeout_seconds: 20,
        }
    }

    /// Default on-disk location for the message store.
    pub fn default_db_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("engage-kit")
            .join("messages.db")
    }
}
