//! v001 -- Initial schema creation.
//!
//! Creates the four core tables: `users`, `token_history`,
//! `charging_requests`, and `sessions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    name          TEXT NOT NULL,
    email         TEXT NOT NULL UNIQUE,       -- lowercased
    city          TEXT NOT NULL,
    token_balance INTEGER NOT NULL DEFAULT 0 CHECK (token_balance >= 0),
    created_at    TEXT NOT NULL               -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Token history (append-only; rows are never updated or deleted)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS token_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     TEXT NOT NULL,                -- FK -> users(id)
    amount      INTEGER NOT NULL,             -- signed; matches balance delta
    kind        TEXT NOT NULL,                -- request_debit | reward | refund | payment_record
    description TEXT NOT NULL,
    request_id  TEXT,                         -- nullable FK -> charging_requests(id)
    created_at  TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_token_history_user
    ON token_history(user_id, id);

-- ----------------------------------------------------------------
-- Charging requests
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS charging_requests (
    id             TEXT PRIMARY KEY NOT NULL, -- UUID v4
    requester_id   TEXT NOT NULL,             -- FK -> users(id)
    helper_id      TEXT,                      -- nullable FK -> users(id); set once at accept
    city           TEXT NOT NULL,             -- as the requester spelled it
    city_key       TEXT NOT NULL,             -- normalized room key; query/group key
    status         TEXT NOT NULL,             -- OPEN | ACCEPTED | COMPLETED | CANCELED
    location       TEXT NOT NULL,
    urgency        TEXT NOT NULL,             -- low | medium | high
    message        TEXT NOT NULL DEFAULT '',
    phone_number   TEXT NOT NULL DEFAULT '',
    estimated_time INTEGER,                   -- minutes, nullable
    token_cost     INTEGER NOT NULL,
    created_at     TEXT NOT NULL,
    accepted_at    TEXT,
    completed_at   TEXT,
    canceled_at    TEXT,

    FOREIGN KEY (requester_id) REFERENCES users(id),
    FOREIGN KEY (helper_id)    REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_requests_city_status
    ON charging_requests(city_key, status, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_requests_requester
    ON charging_requests(requester_id, created_at DESC);

-- ----------------------------------------------------------------
-- Sessions (opaque bearer tokens, stored hashed)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS sessions (
    token_hash TEXT PRIMARY KEY NOT NULL,     -- BLAKE3 of the token, hex
    user_id    TEXT NOT NULL,                 -- FK -> users(id)
    created_at TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id)
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
