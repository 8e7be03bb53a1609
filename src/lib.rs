//! Engage Kit - In-app message engine
//!
//! Client-side lifecycle engine for server-authored in-app messages: a
//! persistent local store, an incremental sync engine, a consent state
//! machine, a tickle-aware presentation queue, and an inbox projection for
//! message-list UIs.
//!
//! ## Module Organization
//!
//! - `manager`: `InAppManager` facade wiring everything together
//! - `config`: Engine configuration
//! - `store`: SQLite-backed message store and scalar sync state
//! - `sync`: Debounced, cursor-based incremental fetch
//! - `consent`: Enrollment strategies and the persisted consent flag
//! - `present`: Presentation queue and renderer hand-off
//! - `inbox`: Inbox view over stored messages
//! - `transport`: HTTP transport seam
//! - `analytics`: Event tracking seam
//! - `notifications`: Platform notification-center seam
//! - `types`: Shared message types, events, and errors

pub mod analytics;
pub mod config;
pub mod consent;
pub mod inbox;
pub mod manager;
pub mod notifications;
pub mod present;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

pub use analytics::{AnalyticsSink, NoopAnalytics, TrackEventType};
pub use config::EngageConfig;
pub use consent::{ConsentStrategy, EnrollmentOutcome};
pub use inbox::{InboxItem, InboxSummary};
pub use manager::InAppManager;
pub use notifications::{NoopNotificationCenter, NotificationCenter};
pub use present::{DisplayMode, Renderer};
pub use sync::SyncOutcome;
pub use transport::{HttpTransport, Transport};
pub use types::error::EngageError;
pub use types::message::{Message, PresentRule};
pub use types::EngageEvent;
