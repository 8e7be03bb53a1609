pub mod engine;

pub use engine::{SyncEngine, SyncOutcome};
