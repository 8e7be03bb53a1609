pub mod error;
pub mod message;

pub use error::EngageError;
pub use message::{IncomingMessage, Message, PresentRule, ServerMessage};

/// Notifications delivered to the host through the event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngageEvent {
    /// Inbox-visible state changed (new/updated/removed items). Coalesced to
    /// at most one per logical batch of mutations.
    InboxUpdated,
    /// A sync run finished successfully.
    SyncCompleted { fetched: u32 },
}
