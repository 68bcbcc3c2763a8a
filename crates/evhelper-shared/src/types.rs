use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique user identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique charging-request identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RequestId(pub Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RequestId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a charging request.
///
/// Legal transitions: `Open -> Accepted -> Completed`, and `Open -> Canceled`
/// or `Accepted -> Canceled`.  `Completed` and `Canceled` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Open,
    Accepted,
    Completed,
    Canceled,
}

impl RequestStatus {
    /// Column / wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Open => "OPEN",
            RequestStatus::Accepted => "ACCEPTED",
            RequestStatus::Completed => "COMPLETED",
            RequestStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Canceled)
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "OPEN" => Ok(RequestStatus::Open),
            "ACCEPTED" => Ok(RequestStatus::Accepted),
            "COMPLETED" => Ok(RequestStatus::Completed),
            "CANCELED" => Ok(RequestStatus::Canceled),
            other => Err(ParseEnumError {
                what: "request status",
                value: other.to_string(),
            }),
        }
    }
}

/// How urgently the requester needs a charge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Medium => "medium",
            Urgency::High => "high",
        }
    }
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Urgency {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Urgency::Low),
            "medium" => Ok(Urgency::Medium),
            "high" => Ok(Urgency::High),
            other => Err(ParseEnumError {
                what: "urgency",
                value: other.to_string(),
            }),
        }
    }
}

/// Classification of a token-history entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TokenEntryKind {
    /// Debit charged when a request is created.
    RequestDebit,
    /// Credit paid to the helper when a request completes.
    Reward,
    /// Credit returned to the requester when a request is canceled.
    Refund,
    /// Audit-only record of the payment on the requester side; no balance
    /// effect (the balance was already debited at creation).
    PaymentRecord,
}

impl TokenEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenEntryKind::RequestDebit => "request_debit",
            TokenEntryKind::Reward => "reward",
            TokenEntryKind::Refund => "refund",
            TokenEntryKind::PaymentRecord => "payment_record",
        }
    }
}

impl std::fmt::Display for TokenEntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TokenEntryKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "request_debit" => Ok(TokenEntryKind::RequestDebit),
            "reward" => Ok(TokenEntryKind::Reward),
            "refund" => Ok(TokenEntryKind::Refund),
            "payment_record" => Ok(TokenEntryKind::PaymentRecord),
            other => Err(ParseEnumError {
                what: "token entry kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Failed to parse one of the small closed enums above.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid {what}: {value}")]
pub struct ParseEnumError {
    pub what: &'static str,
    pub value: String,
}
