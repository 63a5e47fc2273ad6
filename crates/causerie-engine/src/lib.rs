//! # causerie-engine
//!
//! In-memory conversation engine: membership and permissions, gapless
//! per-conversation message logs, monotonic delivery receipts, presence
//! fan-out and notification mutes.
//!
//! State lives in memory; committed records are handed to a [`Journal`]
//! so an external writer can persist them, and an engine can be rebuilt
//! from a [`causerie_shared::protocol::Snapshot`] with [`Engine::restore`].

pub mod config;
pub mod conversations;
pub mod delivery;
pub mod engine;
pub mod journal;
pub mod ledger;
pub mod locks;
pub mod mutes;
pub mod presence;
pub mod resolver;

pub use config::EngineConfig;
pub use conversations::{ConversationView, SettingsPatch};
pub use delivery::{AckOutcome, MessageReceipts, ReadMark};
pub use engine::{Engine, InboxEntry};
pub use journal::Journal;
pub use ledger::{HistoryCursor, MessageDraft};
pub use presence::PresenceSubscription;
