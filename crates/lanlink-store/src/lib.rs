//! # lanlink-store
//!
//! Durable storage for the lanlink server, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for the three
//! durable collaborators of the messaging engine: the user directory,
//! the network-group store, and the message store.  Transient presence
//! state is explicitly NOT persisted here.

pub mod database;
pub mod groups;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

#[cfg(test)]
pub(crate) mod test_support;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
