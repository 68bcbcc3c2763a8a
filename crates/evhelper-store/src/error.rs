use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// A debit would push the balance below zero.  No state was changed.
    #[error("Insufficient tokens: balance {balance}, required {required}")]
    InsufficientFunds { balance: i64, required: i64 },

    /// A conditional status transition found the record in a different
    /// status than expected.  No state was changed.
    #[error("Request status did not match the expected precondition")]
    PreconditionFailed,

    /// Registration attempted with an email that already exists.
    #[error("Email already registered")]
    DuplicateEmail,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// UUID parsing error.
    #[error("UUID error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Chrono parsing error.
    #[error("Timestamp parse error: {0}")]
    ChronoParse(#[from] chrono::ParseError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
