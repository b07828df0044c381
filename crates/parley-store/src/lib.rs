//! # parley-store
//!
//! SQLite persistence for Parley messages and the user directory.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every operation the
//! conversation layer needs. Async callers are expected to run these helpers
//! on a blocking thread.

pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
