//! Wire events exchanged over the real-time fanout connection.
//!
//! Everything is JSON with an `"event"` tag and a `"data"` payload, e.g.
//!
//! ```json
//! {"event":"request.taken","data":{"request_id":"...","status":"ACCEPTED"}}
//! ```
//!
//! Room events go to every connection joined to the request's city room;
//! private events go to a single user's connections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RequestId, RequestStatus, Urgency, UserId};

/// Messages a client may send over the fanout connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientMessage {
    /// Join the room for a city (implicitly leaves any previous room).
    #[serde(rename = "join-city")]
    JoinCity { city: String },

    /// Leave the current city room, if any.
    #[serde(rename = "leave-city")]
    LeaveCity,
}

/// Events the server delivers to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Room: a new request is open in this city.
    #[serde(rename = "request.created")]
    RequestCreated(RequestCreated),

    /// Private to the requester: a helper took the request.
    #[serde(rename = "request.accepted")]
    RequestAccepted(RequestAccepted),

    /// Private to the helper: confirmation of a successful accept.
    #[serde(rename = "request.accept.confirmed")]
    AcceptConfirmed(AcceptConfirmed),

    /// Room: the request is no longer available.
    #[serde(rename = "request.taken")]
    RequestTaken(RequestTaken),

    /// Private to requester and helper: the request completed and tokens
    /// were transferred.
    #[serde(rename = "request.completed")]
    RequestCompleted(RequestCompleted),

    /// Room: a request in this city completed.
    #[serde(rename = "request.completed.notice")]
    RequestCompletedNotice(RequestNotice),

    /// Private to the requester (and the helper, if one was assigned):
    /// the request was withdrawn.
    #[serde(rename = "request.canceled")]
    RequestCanceled(RequestCanceled),

    /// Room: a request in this city was canceled.
    #[serde(rename = "request.canceled.notice")]
    RequestCanceledNotice(RequestNotice),

    /// Ack: the connection joined a city room.
    #[serde(rename = "city.joined")]
    CityJoined { city: String, room: String },

    /// Ack: the connection left its city room.
    #[serde(rename = "city.left")]
    CityLeft,

    /// A client message could not be honored.
    #[serde(rename = "error")]
    Error { message: String },
}

/// Public fields of a request as carried in room broadcasts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestCreated {
    pub request_id: RequestId,
    pub requester_id: UserId,
    pub requester_name: String,
    pub city: String,
    pub location: String,
    pub urgency: Urgency,
    pub message: String,
    pub phone_number: String,
    pub estimated_time: Option<u32>,
    pub token_cost: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestAccepted {
    pub request_id: RequestId,
    pub helper_id: UserId,
    pub helper_name: String,
    pub status: RequestStatus,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AcceptConfirmed {
    pub request_id: RequestId,
    pub requester_id: UserId,
    pub requester_name: String,
    pub city: String,
    pub location: String,
    pub phone_number: String,
    pub status: RequestStatus,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestTaken {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestCompleted {
    pub request_id: RequestId,
    /// The other party, from the recipient's point of view.
    pub counterparty_id: UserId,
    pub counterparty_name: String,
    pub status: RequestStatus,
    pub completed_at: DateTime<Utc>,
    pub token_amount: i64,
    /// The recipient's balance after the transfer.
    pub new_balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestCanceled {
    pub request_id: RequestId,
    pub status: RequestStatus,
    pub canceled_at: DateTime<Utc>,
    pub token_amount: i64,
    /// Refunded balance; present only on the requester's copy.
    pub new_balance: Option<i64>,
}

/// Generic room notice for completed / canceled requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestNotice {
    pub request_id: RequestId,
    pub city: String,
    pub status: RequestStatus,
    pub timestamp: DateTime<Utc>,
}
