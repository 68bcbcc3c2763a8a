//! # evhelper-shared
//!
//! Domain types shared between the evhelper server and its clients:
//! identifiers, the charging-request model, the wire events delivered over
//! the city fanout, and the city-room key normalization.

pub mod constants;
pub mod events;
pub mod rooms;
pub mod types;

pub use types::{RequestId, RequestStatus, TokenEntryKind, Urgency, UserId};
