//! # evhelper-store
//!
//! SQLite persistence for the evhelper service: users and sessions, the
//! token ledger, and the charging-request store with its conditional
//! status-transition primitive.
//!
//! The crate exposes a synchronous [`Database`] handle wrapping a
//! `rusqlite::Connection` with typed helpers for every domain model.  Two
//! guarantees matter to callers:
//!
//! - every balance mutation commits atomically with exactly one
//!   token-history row (see [`ledger`](crate::ledger) docs), and
//! - a request's status changes only through
//!   [`Database::conditional_transition`], a single conditional `UPDATE`
//!   whose affected-row count decides the winner of any race.

pub mod database;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod requests;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
pub use requests::{Page, RequestFilter, StatusChange};
