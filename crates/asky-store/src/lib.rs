//! Unified relational storage: message log, sessions, user memories.
//!
//! One SQLite connection behind a mutex; every transactional operation
//! (interaction save, cascaded delete, compaction) commits atomically.
//! Schema migrations are additive and feature-detected so older databases
//! keep working.

pub mod db;
pub mod error;
pub mod history;
pub mod memories;
pub mod sessions;
pub mod store;
pub mod types;

pub use error::{Result, StoreError};
pub use history::{PendingSummary, LAZY_SUMMARY_THRESHOLD_CHARS};
pub use store::HistoryStore;
pub use types::{DeleteSelector, Interaction, Session, StoredMessage, UserMemory};
