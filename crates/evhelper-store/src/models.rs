//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so the server layer can hand records
//! directly to API responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use evhelper_shared::types::{RequestId, RequestStatus, TokenEntryKind, Urgency, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Lowercased, unique.
    pub email: String,
    /// Free-text city; the case-insensitive grouping key for matching.
    pub city: String,
    /// Never negative; mutated only by the ledger.
    pub token_balance: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Token history
// ---------------------------------------------------------------------------

/// One append-only token-history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenEntry {
    /// Monotonic row id; orders the history.
    pub id: i64,
    pub user_id: UserId,
    /// Signed amount.  For balance-affecting kinds the sign matches the
    /// balance delta; `payment_record` entries carry the payment amount but
    /// never changed the balance.
    pub amount: i64,
    pub kind: TokenEntryKind,
    pub description: String,
    /// The request this entry is tied to, when there is one.
    pub request_id: Option<RequestId>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Charging request
// ---------------------------------------------------------------------------

/// A single charging-assistance ask, tracked through
/// OPEN / ACCEPTED / COMPLETED / CANCELED.
///
/// Rows are never deleted; terminal states are retained for audit.  Status
/// (and the matching timestamp and `helper_id`) changes only through
/// [`Database::conditional_transition`](crate::Database::conditional_transition).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChargingRequest {
    pub id: RequestId,
    pub requester_id: UserId,
    /// Assigned at acceptance; set exactly once.
    pub helper_id: Option<UserId>,
    /// Copied from the requester's city at creation time.
    pub city: String,
    /// Normalized room key for `city`; the store's city query key.
    pub city_key: String,
    pub status: RequestStatus,
    pub location: String,
    pub urgency: Urgency,
    pub message: String,
    pub phone_number: String,
    /// Estimated charging time in minutes.
    pub estimated_time: Option<u32>,
    /// Fixed amount debited at creation, credited to the helper at
    /// completion, refunded at cancellation.
    pub token_cost: i64,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// An active bearer-token session.  Only the token's hash is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub token_hash: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}
