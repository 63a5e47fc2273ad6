//! # causerie-store
//!
//! SQLite persistence for the Causerie engine.
//!
//! The engine keeps its state in memory and journals every committed record;
//! this crate applies those records to a `rusqlite` database on a blocking
//! writer task and loads them back as a [`Snapshot`] at start-up.
//!
//! [`Snapshot`]: causerie_shared::protocol::Snapshot

pub mod conversations;
pub mod database;
pub mod deliveries;
pub mod messages;
pub mod migrations;
pub mod mutes;
pub mod snapshot;
pub mod writer;

mod codec;
mod error;

#[cfg(test)]
mod fixtures;

pub use database::Database;
pub use error::{Result, StoreError};
pub use writer::spawn_journal_writer;
