//! Persistence core for the new-tab Kanban board.
//!
//! The board lives in memory in a [`store::BoardStore`]. Mutations are
//! applied synchronously and handed to a single background writer
//! ([`writer::WriteQueue`]) that saves the persisted subset through the
//! [`bridge::PersistBridge`] into a quota-limited primary backend, with a
//! local fallback ([`storage::adapter::StorageAdapter`]). On start-up the
//! stored record is loaded, migrated to the current schema
//! ([`migrate`]) and merged, after which the [`hydration::HydrationGate`]
//! opens.

pub mod bridge;
pub mod config;
pub mod hydration;
pub mod migrate;
pub mod storage;
pub mod store;
pub mod types;
pub mod writer;

pub use store::{BoardError, BoardStore, HydrationOutcome};
