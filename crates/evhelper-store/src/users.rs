//! User and session records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use evhelper_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Session, User};

impl Database {
    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Insert a new user.  The email must be unique (case-insensitive;
    /// callers pass it lowercased).
    pub fn create_user(&self, user: &User) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO users (id, name, email, city, token_balance, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    user.id.to_string(),
                    user.name,
                    user.email,
                    user.city,
                    user.token_balance,
                    user.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| match &e {
                rusqlite::Error::SqliteFailure(err, Some(msg))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation
                        && msg.contains("users.email") =>
                {
                    StoreError::DuplicateEmail
                }
                _ => StoreError::Sqlite(e),
            })?;
        Ok(())
    }

    /// Fetch a single user by id.
    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, name, email, city, token_balance, created_at
                 FROM users
                 WHERE id = ?1",
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    /// Insert a new session row for a hashed bearer token.
    pub fn create_session(&self, session: &Session) -> Result<()> {
        self.conn().execute(
            "INSERT INTO sessions (token_hash, user_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                session.token_hash,
                session.user_id.to_string(),
                session.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Resolve a hashed bearer token to its user.
    pub fn session_user(&self, token_hash: &str) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT u.id, u.name, u.email, u.city, u.token_balance, u.created_at
                 FROM sessions s
                 JOIN users u ON u.id = s.user_id
                 WHERE s.token_hash = ?1",
                params![token_hash],
                row_to_user,
            )
            .map_err(not_found)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

/// Map a `rusqlite::Row` to a [`User`].
fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let name: String = row.get(1)?;
    let email: String = row.get(2)?;
    let city: String = row.get(3)?;
    let token_balance: i64 = row.get(4)?;
    let created_str: String = row.get(5)?;

    let id: UserId = id_str.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id,
        name,
        email,
        city,
        token_balance,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_user(email: &str) -> User {
        User {
            id: UserId::new(),
            name: "Test User".into(),
            email: email.into(),
            city: "Austin".into(),
            token_balance: 10,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_get_user() {
        let db = Database::open_in_memory().unwrap();
        let user = test_user("a@example.com");
        db.create_user(&user).unwrap();

        let got = db.get_user(user.id).unwrap();
        assert_eq!(got.email, "a@example.com");
        assert_eq!(got.token_balance, 10);
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.create_user(&test_user("dup@example.com")).unwrap();

        let err = db.create_user(&test_user("dup@example.com")).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEmail));
    }

    #[test]
    fn missing_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_user(UserId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn session_resolves_to_user() {
        let db = Database::open_in_memory().unwrap();
        let user = test_user("s@example.com");
        db.create_user(&user).unwrap();

        let session = Session {
            token_hash: "abc123".into(),
            user_id: user.id,
            created_at: Utc::now(),
        };
        db.create_session(&session).unwrap();

        let got = db.session_user("abc123").unwrap();
        assert_eq!(got.id, user.id);

        assert!(matches!(
            db.session_user("nope"),
            Err(StoreError::NotFound)
        ));
    }
}
