/// Tokens debited from the requester when a charging request is created,
/// credited to the helper on completion, and refunded on cancellation.
///
/// Fixed per-request policy value; deliberately not derived from urgency or
/// estimated time.
pub const TOKEN_COST: i64 = 5;

/// Tokens granted to every newly registered user.
pub const INITIAL_TOKEN_BALANCE: i64 = 10;

/// Default page size for listing endpoints.
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Upper bound for client-supplied page sizes.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Size in bytes of the random session token issued at registration.
pub const SESSION_TOKEN_SIZE: usize = 32;
