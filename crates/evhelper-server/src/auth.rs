//! Registration and bearer-token sessions.
//!
//! Registration creates the user with the initial token grant and issues an
//! opaque bearer token: 32 random bytes, hex-encoded.  Only the BLAKE3 hash
//! of the token is stored, so a leaked database never yields usable
//! credentials.  The token authenticates both HTTP calls (Authorization
//! header) and the WebSocket upgrade (`?token=` query parameter).

use std::sync::Arc;

use axum::http::HeaderMap;
use chrono::Utc;
use rand::RngCore;
use tokio::sync::Mutex;
use tracing::info;

use evhelper_shared::constants::{INITIAL_TOKEN_BALANCE, SESSION_TOKEN_SIZE};
use evhelper_shared::types::UserId;
use evhelper_store::{Database, Session, User};

use crate::error::ApiError;

/// Registration payload.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub city: String,
}

/// Create the user, grant the initial balance, and issue a session token.
/// Returns the stored user and the plaintext token (shown exactly once).
pub async fn register(
    db: &Arc<Mutex<Database>>,
    payload: RegisterRequest,
) -> Result<(User, String), ApiError> {
    let name = payload.name.trim().to_string();
    let email = payload.email.trim().to_lowercase();
    let city = payload.city.trim().to_string();

    if name.is_empty() || email.is_empty() || city.is_empty() {
        return Err(ApiError::BadRequest(
            "Name, email, and city are required fields".into(),
        ));
    }
    if !email.contains('@') {
        return Err(ApiError::BadRequest("Invalid email address".into()));
    }

    let user = User {
        id: UserId::new(),
        name,
        email,
        city,
        token_balance: INITIAL_TOKEN_BALANCE,
        created_at: Utc::now(),
    };

    let token = new_session_token();
    let session = Session {
        token_hash: token_hash(&token),
        user_id: user.id,
        created_at: Utc::now(),
    };

    {
        let db = db.lock().await;
        db.create_user(&user)?;
        db.create_session(&session)?;
    }

    info!(user = %user.id, city = %user.city, "registered new user");
    Ok((user, token))
}

/// Resolve a plaintext bearer token to its user.
pub async fn authenticate(db: &Arc<Mutex<Database>>, token: &str) -> Result<User, ApiError> {
    let hash = token_hash(token);
    let db = db.lock().await;
    db.session_user(&hash).map_err(|e| match e {
        evhelper_store::StoreError::NotFound => ApiError::Unauthorized,
        other => other.into(),
    })
}

/// Extract the token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn new_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn token_hash(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_db() -> Arc<Mutex<Database>> {
        Arc::new(Mutex::new(Database::open_in_memory().unwrap()))
    }

    fn registration(email: &str) -> RegisterRequest {
        RegisterRequest {
            name: "Alice".into(),
            email: email.into(),
            city: "Austin".into(),
        }
    }

    #[tokio::test]
    async fn register_grants_initial_balance_and_token() {
        let db = shared_db();
        let (user, token) = register(&db, registration("Alice@Example.com"))
            .await
            .unwrap();

        assert_eq!(user.token_balance, INITIAL_TOKEN_BALANCE);
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(token.len(), SESSION_TOKEN_SIZE * 2);

        let resolved = authenticate(&db, &token).await.unwrap();
        assert_eq!(resolved.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let db = shared_db();
        register(&db, registration("dup@example.com")).await.unwrap();

        let err = register(&db, registration("dup@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::DuplicateEmail));
    }

    #[tokio::test]
    async fn bad_registrations_are_rejected() {
        let db = shared_db();

        let err = register(&db, registration("  ")).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = register(&db, registration("not-an-email")).await.unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[tokio::test]
    async fn unknown_token_is_unauthorized() {
        let db = shared_db();
        let err = authenticate(&db, "deadbeef").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized));
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer abc123".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));

        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Basic abc123".parse().unwrap(),
        );
        assert_eq!(bearer_token(&headers), None);
    }
}
